#![forbid(unsafe_code)]

use std::time::Duration;

use parley_domain::RoomId;
use rand::Rng as _;

/// Backoff schedule: base delay doubling per attempt up to `max_delay`,
/// with a small jitter window, for at most `max_attempts` attempts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub max_attempts: u32,
}

impl Default for BackoffConfig {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_millis(500),
			max_delay: Duration::from_secs(30),
			max_attempts: 8,
		}
	}
}

/// Why a connection ended, as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
	/// The local caller asked to close. Never retried.
	ClientRequested,
	/// The server rejected the credential. Never retried: the same bad
	/// credential would be rejected again.
	AuthRejected,
	/// Network or server failure. Retryable.
	Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
	RetryAfter(Duration),
	GiveUp,
}

/// Nominal backoff for `attempt` (1-based), before jitter.
fn nominal_delay(cfg: &BackoffConfig, attempt: u32) -> Duration {
	let pow = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
	cfg.base_delay.saturating_mul(pow).min(cfg.max_delay)
}

/// Backoff delay for `attempt` with +/-10% jitter applied.
pub fn backoff_delay(cfg: &BackoffConfig, attempt: u32) -> Duration {
	let delay_ms = nominal_delay(cfg, attempt).as_millis() as u64;
	let jitter_window = (delay_ms / 10).max(1);
	let mut rng = rand::rng();
	let jitter_offset = rng.random_range(0..=(jitter_window * 2));
	Duration::from_millis(delay_ms.saturating_sub(jitter_window).saturating_add(jitter_offset))
}

/// Pure reconnect state machine. Owns the attempt counter and the room to
/// re-join after a successful reconnect; the caller owns the socket.
#[derive(Debug, Clone)]
pub struct ReconnectController {
	cfg: BackoffConfig,
	attempt: u32,
	active_room: Option<RoomId>,
}

impl ReconnectController {
	pub fn new(cfg: BackoffConfig) -> Self {
		Self {
			cfg,
			attempt: 0,
			active_room: None,
		}
	}

	/// Room to re-issue `join_room` for after reconnecting.
	pub fn active_room(&self) -> Option<RoomId> {
		self.active_room
	}

	pub fn set_active_room(&mut self, room: Option<RoomId>) {
		self.active_room = room;
	}

	/// A connection was established; the attempt counter resets.
	pub fn record_connected(&mut self) {
		self.attempt = 0;
	}

	pub fn attempts(&self) -> u32 {
		self.attempt
	}

	/// Classify a disconnect. Terminal reasons give up immediately; transient
	/// ones schedule a retry until the attempt ceiling is reached.
	pub fn on_disconnect(&mut self, reason: CloseReason) -> ReconnectDecision {
		match reason {
			CloseReason::ClientRequested | CloseReason::AuthRejected => ReconnectDecision::GiveUp,
			CloseReason::Transient => {
				self.attempt = self.attempt.saturating_add(1);
				if self.attempt > self.cfg.max_attempts {
					ReconnectDecision::GiveUp
				} else {
					ReconnectDecision::RetryAfter(backoff_delay(&self.cfg, self.attempt))
				}
			}
		}
	}
}
