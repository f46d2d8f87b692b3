#![forbid(unsafe_code)]

pub mod health;
pub mod rooms;
pub mod session;
pub mod tokens;

use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use parley_domain::ChatError;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use tracing::error;

use crate::gateway;
use crate::state::AppState;

/// HTTP wrapper for `ChatError` with the canonical status mapping. Store
/// failures are logged and surfaced as a sanitized 500.
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
	fn from(e: ChatError) -> Self {
		Self(e)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, message) = match &self.0 {
			ChatError::Unauthenticated | ChatError::Expired | ChatError::Revoked => {
				(StatusCode::UNAUTHORIZED, self.0.to_string())
			}
			ChatError::Forbidden(_) => (StatusCode::FORBIDDEN, self.0.to_string()),
			ChatError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
			ChatError::Validation(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
			ChatError::Conflict(_) => (StatusCode::CONFLICT, self.0.to_string()),
			ChatError::Store(detail) => {
				error!(error = %detail, "request failed on the store");
				(StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
			}
		};

		(status, Json(json!({ "error": message }))).into_response()
	}
}

/// Build the application router: session surface, rooms/messages, tokens,
/// the websocket gateway, and health probes, behind a cookie session layer
/// and request tracing.
pub fn router(state: AppState, session_ttl: Duration) -> Router {
	let session_store = MemoryStore::default();
	let session_layer = SessionManagerLayer::new(session_store)
		.with_secure(false)
		.with_expiry(Expiry::OnInactivity(time::Duration::seconds(session_ttl.as_secs() as i64)));

	Router::new()
		.route("/register", post(session::register))
		.route("/login", post(session::login))
		.route("/logout", post(session::logout))
		.route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
		.route(
			"/rooms/{id}",
			get(rooms::get_room).put(rooms::update_room).delete(rooms::delete_room),
		)
		.route(
			"/rooms/{id}/messages",
			get(rooms::list_messages).post(rooms::post_message),
		)
		.route("/tokens", get(tokens::list_tokens).post(tokens::create_token))
		.route("/tokens/generate", post(tokens::generate_token))
		.route(
			"/tokens/{id}",
			get(tokens::get_token).put(tokens::update_token).delete(tokens::delete_token),
		)
		.route("/ws", get(gateway::ws_handler))
		.route("/healthz", get(health::healthz))
		.route("/readyz", get(health::readyz))
		.layer(session_layer)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}
