#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parley_domain::{ChatError, Message, RoomId, UserId};
use parley_protocol::ServerFrame;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::store::ChatStore;

/// Per-room broadcast hub. Each room owns its membership set behind its own
/// lock, so persisting and fanning out a message in one room never blocks
/// another room. Membership is owned exclusively by the gateway: connections
/// register on join and are removed on leave or socket close.
#[derive(Clone)]
pub struct RoomHub {
	inner: Arc<Mutex<HubInner>>,
	cfg: RoomHubConfig,
}

/// Configuration for `RoomHub`.
#[derive(Debug, Clone)]
pub struct RoomHubConfig {
	/// Maximum number of queued frames per connection.
	pub subscriber_queue_capacity: usize,
}

impl Default for RoomHubConfig {
	fn default() -> Self {
		Self {
			subscriber_queue_capacity: 256,
		}
	}
}

#[derive(Default)]
struct HubInner {
	/// Entries are retained for the process lifetime; the set is bounded by
	/// the number of rooms ever joined.
	rooms: HashMap<RoomId, Arc<Mutex<RoomEntry>>>,
	conn_rooms: HashMap<u64, RoomId>,
}

#[derive(Default)]
struct RoomEntry {
	members: HashMap<u64, mpsc::Sender<ServerFrame>>,
}

impl RoomHub {
	pub fn new(cfg: RoomHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(HubInner::default())),
			cfg,
		}
	}

	/// Create the bounded frame channel for one connection.
	pub fn channel(&self) -> (mpsc::Sender<ServerFrame>, mpsc::Receiver<ServerFrame>) {
		mpsc::channel(self.cfg.subscriber_queue_capacity)
	}

	async fn entry(&self, room_id: RoomId) -> Arc<Mutex<RoomEntry>> {
		let mut inner = self.inner.lock().await;
		Arc::clone(inner.rooms.entry(room_id).or_default())
	}

	/// Register a connection in a room. A connection is joined to at most one
	/// room; joining implicitly deregisters it from any previous one.
	pub async fn join(&self, conn_id: u64, room_id: RoomId, tx: mpsc::Sender<ServerFrame>) {
		self.leave(conn_id).await;

		let entry = {
			let mut inner = self.inner.lock().await;
			inner.conn_rooms.insert(conn_id, room_id);
			Arc::clone(inner.rooms.entry(room_id).or_default())
		};

		let mut entry = entry.lock().await;
		prune_closed_members(&mut entry);
		entry.members.insert(conn_id, tx);
		debug!(conn_id, room = %room_id, members = entry.members.len(), "room hub: joined");
	}

	/// Deregister a connection from whatever room it is joined to.
	pub async fn leave(&self, conn_id: u64) {
		let found = {
			let mut inner = self.inner.lock().await;
			inner
				.conn_rooms
				.remove(&conn_id)
				.and_then(|room_id| inner.rooms.get(&room_id).map(|e| (room_id, Arc::clone(e))))
		};

		let Some((room_id, entry)) = found else {
			return;
		};

		let mut entry = entry.lock().await;
		entry.members.remove(&conn_id);
		prune_closed_members(&mut entry);
		debug!(conn_id, room = %room_id, members = entry.members.len(), "room hub: left");
	}

	/// Persist a message and broadcast it to every connection registered in
	/// the room, the sender included. Both steps run under the room lock, so
	/// broadcast order equals commit order. Delivery per connection is
	/// at-most-once: a full queue drops the frame rather than blocking.
	pub async fn send_message(
		&self,
		store: &ChatStore,
		room_id: RoomId,
		user_id: UserId,
		content: &str,
	) -> Result<Message, ChatError> {
		let entry = self.entry(room_id).await;
		let mut entry = entry.lock().await;

		let message = store.append_message(room_id, user_id, content).await?;
		metrics::counter!("parley_messages_persisted_total").increment(1);

		let frame = ServerFrame::NewMessage {
			message: message.clone(),
		};

		let mut dropped = 0u64;
		entry.members.retain(|conn_id, tx| match tx.try_send(frame.clone()) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(_)) => {
				dropped += 1;
				debug!(conn_id, room = %room_id, "room hub: dropped frame, subscriber queue full");
				true
			}
			Err(mpsc::error::TrySendError::Closed(_)) => false,
		});

		if dropped > 0 {
			metrics::counter!("parley_gateway_dropped_frames_total").increment(dropped);
		}

		Ok(message)
	}

	/// Snapshot of live member counts, for diagnostics and tests.
	pub async fn room_member_counts(&self) -> HashMap<RoomId, usize> {
		let rooms: Vec<(RoomId, Arc<Mutex<RoomEntry>>)> = {
			let inner = self.inner.lock().await;
			inner.rooms.iter().map(|(k, v)| (*k, Arc::clone(v))).collect()
		};

		let mut counts = HashMap::with_capacity(rooms.len());
		for (room_id, entry) in rooms {
			let entry = entry.lock().await;
			counts.insert(room_id, entry.members.values().filter(|tx| !tx.is_closed()).count());
		}
		counts
	}
}

fn prune_closed_members(entry: &mut RoomEntry) {
	entry.members.retain(|_, tx| !tx.is_closed());
}
