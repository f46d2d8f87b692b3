#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use parley_client_core::{ChatClient, ClientConfig, ClientCoreError};
use parley_domain::{ApiToken, Room, RoomId, SecretString, TokenId, TokenKind, TokenPermissions, User, UserId};
use parley_protocol::frames::ServerFrame;
use parley_server::config::ServerConfig;
use parley_server::gateway::room_hub::{RoomHub, RoomHubConfig};
use parley_server::http;
use parley_server::http::health::HealthState;
use parley_server::state::AppState;
use parley_server::store::ChatStore;
use parley_server::util::time::unix_ms_now;

async fn spawn_server() -> (SocketAddr, ChatStore) {
	let store = ChatStore::connect("sqlite::memory:").await.expect("connect store");
	let hub = RoomHub::new(RoomHubConfig::default());
	let state = AppState::new(store.clone(), hub, HealthState::new(), ServerConfig::default().gateway);
	let app = http::router(state, Duration::from_secs(3600));

	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("local addr");
	tokio::spawn(async move {
		axum::serve(listener, app).await.expect("serve");
	});

	(addr, store)
}

async fn seed_user(store: &ChatStore, username: &str) -> User {
	store
		.create_user(username, &http::session::digest_password("hunter2"), parley_domain::Role::User)
		.await
		.expect("seed user")
}

async fn seed_token(store: &ChatStore, owner: UserId, secret: &str, permissions: TokenPermissions) {
	let token = ApiToken {
		id: TokenId::new_v4(),
		secret: SecretString::new(secret.to_string()),
		owner_user_id: owner,
		kind: TokenKind::Client,
		name: "smoke".to_string(),
		permissions,
		created_at: unix_ms_now(),
		expires_at: None,
		last_used_at: None,
		revoked: false,
	};
	store.insert_token(&token).await.expect("seed token");
}

async fn connect(addr: SocketAddr, secret: &str) -> ChatClient {
	let cfg = ClientConfig::new(format!("ws://{addr}/ws")).with_bearer_token(secret);
	ChatClient::connect(&cfg).await.expect("connect gateway")
}

async fn expect_frame(client: &mut ChatClient) -> ServerFrame {
	tokio::time::timeout(Duration::from_secs(5), client.next_frame())
		.await
		.expect("frame within deadline")
		.expect("gateway stream healthy")
		.expect("stream still open")
}

async fn join(client: &mut ChatClient, room: &Room) -> Vec<parley_domain::Message> {
	client.join_room(room.id).await.expect("join room");
	match expect_frame(client).await {
		ServerFrame::MessageHistory { room_id, messages } => {
			assert_eq!(room_id, room.id);
			messages
		}
		other => panic!("expected message history on join, got: {other:?}"),
	}
}

fn new_message(frame: ServerFrame) -> parley_domain::Message {
	match frame {
		ServerFrame::NewMessage { message } => message,
		other => panic!("expected a new message, got: {other:?}"),
	}
}

/// Send from one member and wait for the fan-out to reach both, so the next
/// send cannot race this one.
async fn relay(sender: &mut ChatClient, other: &mut ChatClient, content: &str) -> parley_domain::Message {
	sender.send_message(content).await.expect("send");

	let seen_by_sender = new_message(expect_frame(sender).await);
	let seen_by_other = new_message(expect_frame(other).await);
	assert_eq!(seen_by_sender.content, content, "sender hears its own message");
	assert_eq!(seen_by_other.content, content);
	assert_eq!(seen_by_sender.id, seen_by_other.id);

	seen_by_sender
}

#[tokio::test]
async fn broadcast_reaches_every_member_in_commit_order() {
	let (addr, store) = spawn_server().await;
	let alice = seed_user(&store, "alice").await;
	let bob = seed_user(&store, "bob").await;
	seed_token(&store, alice.id, "alice-secret", TokenPermissions::full()).await;
	seed_token(&store, bob.id, "bob-secret", TokenPermissions::full()).await;
	let room = store.create_room("general", "", false, alice.id).await.unwrap();

	let mut a = connect(addr, "alice-secret").await;
	let mut b = connect(addr, "bob-secret").await;
	assert!(join(&mut a, &room).await.is_empty());
	assert!(join(&mut b, &room).await.is_empty());

	let first = relay(&mut a, &mut b, "from-a-1").await;
	let second = relay(&mut b, &mut a, "from-b-1").await;
	let third = relay(&mut a, &mut b, "from-a-2").await;

	assert!(first.id < second.id && second.id < third.id, "ids follow commit order");
	assert_eq!(first.user_id, alice.id);
	assert_eq!(second.user_id, bob.id);
}

#[tokio::test]
async fn join_delivers_history_then_live_messages_once() {
	let (addr, store) = spawn_server().await;
	let alice = seed_user(&store, "alice").await;
	let bob = seed_user(&store, "bob").await;
	seed_token(&store, alice.id, "alice-secret", TokenPermissions::full()).await;
	seed_token(&store, bob.id, "bob-secret", TokenPermissions::full()).await;
	let room = store.create_room("general", "", false, alice.id).await.unwrap();

	store.append_message(room.id, alice.id, "earlier-1").await.unwrap();
	store.append_message(room.id, alice.id, "earlier-2").await.unwrap();

	let mut a = connect(addr, "alice-secret").await;
	let history = join(&mut a, &room).await;
	let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
	assert_eq!(contents, ["earlier-1", "earlier-2"], "history is chronological");

	let mut b = connect(addr, "bob-secret").await;
	b.join_room(room.id).await.unwrap();
	let _ = expect_frame(&mut b).await;
	b.send_message("live").await.unwrap();

	// Only the live message follows the snapshot; history is not replayed.
	let live = new_message(expect_frame(&mut a).await);
	assert_eq!(live.content, "live");
	assert!(live.id > history.last().unwrap().id);
}

#[tokio::test]
async fn handshake_rejects_bad_credentials_before_upgrade() {
	let (addr, _store) = spawn_server().await;

	let cfg = ClientConfig::new(format!("ws://{addr}/ws")).with_bearer_token("no-such-token");
	match ChatClient::connect(&cfg).await {
		Err(ClientCoreError::Auth(_)) => {}
		Err(other) => panic!("expected an auth rejection, got: {other:?}"),
		Ok(_) => panic!("expected an auth rejection, got an upgraded connection"),
	}
}

#[tokio::test]
async fn join_failures_surface_as_error_frames() {
	let (addr, store) = spawn_server().await;
	let alice = seed_user(&store, "alice").await;
	let bob = seed_user(&store, "bob").await;
	let private = store.create_room("ops", "", true, alice.id).await.unwrap();
	let public = store.create_room("general", "", false, alice.id).await.unwrap();

	// Bob's token is scoped to the public room only, so neither membership
	// nor scope admits him to the private one.
	let scoped = TokenPermissions {
		room_scope: parley_domain::RoomScope::rooms(vec![public.id]),
		..TokenPermissions::full()
	};
	seed_token(&store, bob.id, "bob-secret", scoped).await;

	let mut b = connect(addr, "bob-secret").await;

	b.join_room(RoomId::new_v4()).await.unwrap();
	match expect_frame(&mut b).await {
		ServerFrame::Error { message } => assert!(message.contains("not found")),
		other => panic!("expected an error frame, got: {other:?}"),
	}

	// Non-member joining an out-of-scope private room is refused, and the
	// connection stays usable.
	b.join_room(private.id).await.unwrap();
	match expect_frame(&mut b).await {
		ServerFrame::Error { .. } => {}
		other => panic!("expected an error frame, got: {other:?}"),
	}

	assert!(join(&mut b, &public).await.is_empty());
}
