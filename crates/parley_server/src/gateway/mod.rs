#![forbid(unsafe_code)]

pub mod connection;
pub mod room_hub;

#[cfg(test)]
mod room_hub_tests;

use axum::extract::{RawQuery, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use parley_domain::ChatError;
use tower_sessions::Session;
use tracing::debug;

use crate::auth;
use crate::http::ApiError;
use crate::state::AppState;

/// `GET /ws`. The credential resolver runs against the upgrade request
/// within the handshake window; a failure rejects the request and the socket
/// is never upgraded. The server does not retry on the client's behalf.
pub async fn ws_handler(
	State(state): State<AppState>,
	session: Session,
	headers: HeaderMap,
	RawQuery(query): RawQuery,
	ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
	let bearer = auth::bearer_from_parts(&headers, query.as_deref());
	let resolved = tokio::time::timeout(
		state.gateway.handshake_timeout,
		auth::resolve_principal(&state.store, bearer.as_deref(), &session),
	)
	.await;

	let principal = match resolved {
		Ok(Ok(principal)) => principal,
		Ok(Err(e)) => {
			metrics::counter!("parley_auth_denied_total").increment(1);
			return Err(ApiError::from(e));
		}
		Err(_) => {
			debug!("websocket handshake timed out resolving credentials");
			return Err(ApiError::from(ChatError::Unauthenticated));
		}
	};

	let conn_id = state.next_conn_id();
	Ok(ws.on_upgrade(move |socket| connection::handle_connection(state, socket, principal, conn_id)))
}
