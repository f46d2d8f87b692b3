#![forbid(unsafe_code)]

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt as _, StreamExt as _};
use parley_domain::{Action, ChatError, Principal, RoomId};
use parley_protocol::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::gate;
use crate::state::AppState;

fn user_facing(e: &ChatError) -> String {
	match e {
		ChatError::Store(detail) => {
			error!(error = %detail, "gateway store failure");
			"internal error".to_string()
		}
		other => other.to_string(),
	}
}

async fn send_frame(tx: &mpsc::Sender<ServerFrame>, frame: ServerFrame) {
	if tx.send(frame).await.is_err() {
		debug!("frame channel closed while sending");
	}
}

async fn send_error(tx: &mpsc::Sender<ServerFrame>, message: impl Into<String>) {
	send_frame(tx, ServerFrame::Error { message: message.into() }).await;
}

/// Drive one authenticated websocket connection until the socket closes.
///
/// State machine: `Authenticated` on entry, `Joined(room)` after a
/// successful `join_room`, back to `Authenticated` on `leave_room`. The hub
/// registration is removed synchronously before this function returns.
pub async fn handle_connection(state: AppState, socket: WebSocket, principal: Principal, conn_id: u64) {
	metrics::counter!("parley_gateway_connections_total").increment(1);
	info!(conn_id, user_id = %principal.user_id, "gateway connection open");

	let (tx, mut rx) = state.hub.channel();
	let (mut sink, mut stream) = socket.split();

	let writer = tokio::spawn(async move {
		while let Some(frame) = rx.recv().await {
			let text = match parley_protocol::encode_frame(&frame) {
				Ok(text) => text,
				Err(e) => {
					warn!(error = %e, "failed to encode outbound frame");
					continue;
				}
			};
			if sink.send(WsMessage::Text(text.into())).await.is_err() {
				break;
			}
		}
	});

	let mut joined: Option<RoomId> = None;

	while let Some(msg) = stream.next().await {
		let msg = match msg {
			Ok(msg) => msg,
			Err(e) => {
				debug!(conn_id, error = %e, "socket error");
				break;
			}
		};

		match msg {
			WsMessage::Text(text) => {
				metrics::counter!("parley_gateway_frames_total").increment(1);
				match parley_protocol::decode_client_frame(text.as_str()) {
					Ok(frame) => handle_frame(&state, &principal, conn_id, &tx, &mut joined, frame).await,
					Err(e) => send_error(&tx, format!("invalid frame: {e}")).await,
				}
			}
			WsMessage::Close(_) => break,
			// Ping/pong are handled by the websocket layer.
			_ => {}
		}
	}

	// Deregister before returning so a closed connection never lingers in a
	// room's membership set.
	state.hub.leave(conn_id).await;
	writer.abort();
	info!(conn_id, "gateway connection closed");
}

async fn handle_frame(
	state: &AppState,
	principal: &Principal,
	conn_id: u64,
	tx: &mpsc::Sender<ServerFrame>,
	joined: &mut Option<RoomId>,
	frame: ClientFrame,
) {
	match frame {
		ClientFrame::JoinRoom { room_id } => {
			let room = match state.store.room_by_id(room_id).await {
				Ok(Some(room)) => room,
				Ok(None) => {
					send_error(tx, "room not found").await;
					return;
				}
				Err(e) => {
					send_error(tx, user_facing(&e)).await;
					return;
				}
			};

			if let Err(e) = gate::authorize(&state.store, principal, Action::Read, Some(&room)).await {
				metrics::counter!("parley_auth_denied_total").increment(1);
				send_error(tx, user_facing(&e)).await;
				return;
			}

			// History is read before hub registration: a message committed in
			// the gap is missed by the joiner rather than delivered twice.
			let messages = match state.store.recent_messages(room_id, state.gateway.history_limit).await {
				Ok(messages) => messages,
				Err(e) => {
					send_error(tx, user_facing(&e)).await;
					return;
				}
			};

			send_frame(tx, ServerFrame::MessageHistory { room_id, messages }).await;
			state.hub.join(conn_id, room_id, tx.clone()).await;
			*joined = Some(room_id);
		}

		ClientFrame::NewMessage { content } => {
			let Some(room_id) = *joined else {
				send_error(tx, "join a room before sending messages").await;
				return;
			};

			let content = content.trim();
			if content.is_empty() {
				send_error(tx, "message content must not be empty").await;
				return;
			}

			let room = match state.store.room_by_id(room_id).await {
				Ok(Some(room)) => room,
				Ok(None) => {
					// Room deleted while joined.
					state.hub.leave(conn_id).await;
					*joined = None;
					send_error(tx, "room not found").await;
					return;
				}
				Err(e) => {
					send_error(tx, user_facing(&e)).await;
					return;
				}
			};

			if let Err(e) = gate::authorize(&state.store, principal, Action::Write, Some(&room)).await {
				metrics::counter!("parley_auth_denied_total").increment(1);
				send_error(tx, user_facing(&e)).await;
				return;
			}

			// Fail closed: a persistence failure reaches only the sender and
			// nothing is broadcast.
			if let Err(e) = state
				.hub
				.send_message(&state.store, room_id, principal.user_id, content)
				.await
			{
				send_error(tx, user_facing(&e)).await;
			}
		}

		ClientFrame::LeaveRoom { room_id } => {
			if *joined == Some(room_id) {
				state.hub.leave(conn_id).await;
				*joined = None;
			} else {
				send_error(tx, "not joined to that room").await;
			}
		}
	}
}
