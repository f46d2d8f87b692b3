#![forbid(unsafe_code)]

use std::time::Duration;

use parley_domain::{MessageId, Role, Room, User};
use parley_protocol::ServerFrame;
use tokio::time::timeout;

use crate::gateway::room_hub::{RoomHub, RoomHubConfig};
use crate::store::ChatStore;

async fn fixture() -> (ChatStore, User, Room) {
	let store = ChatStore::connect("sqlite::memory:").await.expect("connect store");
	let user = store.create_user("alice", "digest", Role::User).await.expect("create user");
	let room = store.create_room("general", "", false, user.id).await.expect("create room");
	(store, user, room)
}

fn expect_new_message(frame: ServerFrame) -> parley_domain::Message {
	match frame {
		ServerFrame::NewMessage { message } => message,
		other => panic!("expected new_message frame, got: {other:?}"),
	}
}

#[tokio::test]
async fn broadcast_reaches_every_member_in_commit_order() {
	let (store, user, room) = fixture().await;
	let hub = RoomHub::new(RoomHubConfig::default());

	let (tx_a, mut rx_a) = hub.channel();
	let (tx_b, mut rx_b) = hub.channel();
	hub.join(1, room.id, tx_a).await;
	hub.join(2, room.id, tx_b).await;

	for text in ["one", "two", "three"] {
		hub.send_message(&store, room.id, user.id, text).await.expect("send");
	}

	for rx in [&mut rx_a, &mut rx_b] {
		let mut last_id = MessageId(0);
		for expected in ["one", "two", "three"] {
			let frame = timeout(Duration::from_millis(250), rx.recv())
				.await
				.expect("expected frame within timeout")
				.expect("channel open");
			let message = expect_new_message(frame);
			assert_eq!(message.content, expected);
			assert!(message.id > last_id, "broadcast order must match commit order");
			last_id = message.id;
		}
	}
}

#[tokio::test]
async fn full_subscriber_queue_drops_instead_of_blocking() {
	let (store, user, room) = fixture().await;
	let hub = RoomHub::new(RoomHubConfig {
		subscriber_queue_capacity: 1,
	});

	let (tx, mut rx) = hub.channel();
	hub.join(1, room.id, tx).await;

	hub.send_message(&store, room.id, user.id, "first").await.expect("send");
	// The queue is full; this one is dropped for the subscriber but still
	// persisted.
	let second = hub.send_message(&store, room.id, user.id, "second").await.expect("send");
	assert_eq!(second.content, "second");

	let frame = timeout(Duration::from_millis(250), rx.recv())
		.await
		.expect("expected first frame")
		.expect("channel open");
	assert_eq!(expect_new_message(frame).content, "first");

	let nothing = timeout(Duration::from_millis(50), rx.recv()).await;
	assert!(nothing.is_err(), "dropped frame must not be delivered late");

	let history = store.recent_messages(room.id, 10).await.expect("history");
	assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn join_replaces_previous_room() {
	let (store, user, room_a) = fixture().await;
	let room_b = store.create_room("other", "", false, user.id).await.expect("create room");
	let hub = RoomHub::new(RoomHubConfig::default());

	let (tx, mut rx) = hub.channel();
	hub.join(1, room_a.id, tx.clone()).await;
	hub.join(1, room_b.id, tx).await;

	hub.send_message(&store, room_a.id, user.id, "in-a").await.expect("send");
	let nothing = timeout(Duration::from_millis(50), rx.recv()).await;
	assert!(nothing.is_err(), "must not receive frames for the replaced room");

	hub.send_message(&store, room_b.id, user.id, "in-b").await.expect("send");
	let frame = timeout(Duration::from_millis(250), rx.recv())
		.await
		.expect("expected frame")
		.expect("channel open");
	assert_eq!(expect_new_message(frame).content, "in-b");
}

#[tokio::test]
async fn leave_stops_delivery() {
	let (store, user, room) = fixture().await;
	let hub = RoomHub::new(RoomHubConfig::default());

	let (tx, mut rx) = hub.channel();
	hub.join(1, room.id, tx).await;
	hub.leave(1).await;

	hub.send_message(&store, room.id, user.id, "after-leave").await.expect("send");
	// Leaving dropped the hub's sender, so the channel closes with nothing
	// delivered.
	let nothing = timeout(Duration::from_millis(50), rx.recv()).await;
	assert!(matches!(nothing, Ok(None)));

	let counts = hub.room_member_counts().await;
	assert_eq!(counts.get(&room.id).copied().unwrap_or(0), 0);
}

#[tokio::test]
async fn closed_receivers_are_pruned_on_publish() {
	let (store, user, room) = fixture().await;
	let hub = RoomHub::new(RoomHubConfig::default());

	let (tx, rx) = hub.channel();
	hub.join(1, room.id, tx).await;
	drop(rx);

	hub.send_message(&store, room.id, user.id, "into-the-void").await.expect("send");

	let counts = hub.room_member_counts().await;
	assert_eq!(counts.get(&room.id).copied().unwrap_or(0), 0);
}
