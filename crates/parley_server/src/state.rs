#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::GatewaySettings;
use crate::gateway::room_hub::RoomHub;
use crate::http::health::HealthState;
use crate::store::ChatStore;

/// Shared application state behind every route and gateway connection.
#[derive(Clone)]
pub struct AppState {
	pub store: ChatStore,
	pub hub: RoomHub,
	pub health: HealthState,
	pub gateway: GatewaySettings,
	next_conn_id: Arc<AtomicU64>,
}

impl AppState {
	pub fn new(store: ChatStore, hub: RoomHub, health: HealthState, gateway: GatewaySettings) -> Self {
		Self {
			store,
			hub,
			health,
			gateway,
			next_conn_id: Arc::new(AtomicU64::new(1)),
		}
	}

	pub fn next_conn_id(&self) -> u64 {
		self.next_conn_id.fetch_add(1, Ordering::Relaxed)
	}
}
