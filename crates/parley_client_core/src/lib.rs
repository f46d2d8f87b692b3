#![forbid(unsafe_code)]

//! Headless chat client: a typed WebSocket session over the gateway protocol,
//! plus a reconnect controller with jittered exponential backoff.

pub mod reconnect;

use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use parley_domain::{RoomId, SecretString};
use parley_protocol::frames::{self, ClientFrame, ProtocolError, ServerFrame};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, warn};

pub use reconnect::{BackoffConfig, CloseReason, ReconnectController, ReconnectDecision};

#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Gateway endpoint, e.g. `ws://127.0.0.1:8203/ws`.
	pub server_url: String,
	/// API token sent as `Authorization: Bearer <secret>` on the handshake.
	/// Without one the handshake relies on a session cookie, which browser
	/// clients carry implicitly; headless callers normally set a token.
	pub bearer_token: Option<SecretString>,
	pub connect_timeout: Duration,
	pub backoff: BackoffConfig,
}

impl ClientConfig {
	pub fn new(server_url: impl Into<String>) -> Self {
		Self {
			server_url: server_url.into(),
			bearer_token: None,
			connect_timeout: Duration::from_secs(10),
			backoff: BackoffConfig::default(),
		}
	}

	pub fn with_bearer_token(mut self, secret: impl Into<String>) -> Self {
		self.bearer_token = Some(SecretString::new(secret.into()));
		self
	}
}

#[derive(Debug, Error)]
pub enum ClientCoreError {
	#[error("invalid endpoint: {0}")]
	Endpoint(String),
	#[error("connect failed: {0}")]
	Connect(String),
	#[error("authentication rejected: {0}")]
	Auth(String),
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	#[error("transport error: {0}")]
	Transport(String),
	#[error("connection closed")]
	Closed,
}

fn classify_connect_error(e: tungstenite::Error) -> ClientCoreError {
	match e {
		tungstenite::Error::Http(response)
			if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
		{
			ClientCoreError::Auth(format!("server rejected the handshake with {}", response.status()))
		}
		other => ClientCoreError::Connect(other.to_string()),
	}
}

/// One live gateway connection. Reconnecting callers hold a
/// [`ReconnectController`] alongside and open a fresh `ChatClient` per attempt.
pub struct ChatClient {
	stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ChatClient {
	pub async fn connect(cfg: &ClientConfig) -> Result<Self, ClientCoreError> {
		let mut request = cfg
			.server_url
			.as_str()
			.into_client_request()
			.map_err(|e| ClientCoreError::Endpoint(e.to_string()))?;
		if let Some(token) = &cfg.bearer_token {
			let value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
				.map_err(|e| ClientCoreError::Endpoint(e.to_string()))?;
			request.headers_mut().insert(header::AUTHORIZATION, value);
		}

		let (stream, _response) = tokio::time::timeout(cfg.connect_timeout, connect_async(request))
			.await
			.map_err(|_| ClientCoreError::Connect("handshake timed out".to_string()))?
			.map_err(classify_connect_error)?;

		Ok(Self { stream })
	}

	async fn send_frame(&mut self, frame: &ClientFrame) -> Result<(), ClientCoreError> {
		let text = frames::encode_frame(frame)?;
		self.stream
			.send(WsMessage::Text(text.into()))
			.await
			.map_err(|e| ClientCoreError::Transport(e.to_string()))
	}

	pub async fn join_room(&mut self, room_id: RoomId) -> Result<(), ClientCoreError> {
		self.send_frame(&ClientFrame::JoinRoom { room_id }).await
	}

	pub async fn send_message(&mut self, content: impl Into<String>) -> Result<(), ClientCoreError> {
		self.send_frame(&ClientFrame::NewMessage { content: content.into() }).await
	}

	pub async fn leave_room(&mut self, room_id: RoomId) -> Result<(), ClientCoreError> {
		self.send_frame(&ClientFrame::LeaveRoom { room_id }).await
	}

	/// Next server frame, or `None` once the peer closes. Ping/pong and other
	/// control messages are handled by the transport and skipped here.
	pub async fn next_frame(&mut self) -> Result<Option<ServerFrame>, ClientCoreError> {
		while let Some(msg) = self.stream.next().await {
			match msg.map_err(|e| ClientCoreError::Transport(e.to_string()))? {
				WsMessage::Text(text) => return Ok(Some(frames::decode_server_frame(text.as_str())?)),
				WsMessage::Close(_) => return Ok(None),
				_ => continue,
			}
		}
		Ok(None)
	}

	pub async fn close(mut self) -> Result<(), ClientCoreError> {
		match self.stream.close(None).await {
			Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
			Err(e) => Err(ClientCoreError::Transport(e.to_string())),
		}
	}
}

async fn read_until_disconnect<F>(client: &mut ChatClient, on_frame: &mut F) -> CloseReason
where
	F: FnMut(&ServerFrame),
{
	loop {
		match client.next_frame().await {
			Ok(Some(frame)) => on_frame(&frame),
			Ok(None) => return CloseReason::Transient,
			Err(e) => {
				warn!(error = %e, "gateway connection lost");
				return CloseReason::Transient;
			}
		}
	}
}

/// Run a session against the gateway, reconnecting with backoff on transient
/// failures and re-joining `room_id` after each successful reconnect. Returns
/// when the credential is rejected or the attempt ceiling is reached.
pub async fn run_session<F>(cfg: &ClientConfig, room_id: Option<RoomId>, mut on_frame: F) -> Result<(), ClientCoreError>
where
	F: FnMut(&ServerFrame),
{
	let mut ctrl = ReconnectController::new(cfg.backoff.clone());
	ctrl.set_active_room(room_id);

	loop {
		let reason = match ChatClient::connect(cfg).await {
			Ok(mut client) => {
				ctrl.record_connected();
				info!(url = %cfg.server_url, "connected");

				let joined = match ctrl.active_room() {
					Some(room) => client.join_room(room).await,
					None => Ok(()),
				};
				match joined {
					Ok(()) => read_until_disconnect(&mut client, &mut on_frame).await,
					Err(e) => {
						warn!(error = %e, "failed to re-join room");
						CloseReason::Transient
					}
				}
			}
			Err(e @ ClientCoreError::Auth(_)) => return Err(e),
			Err(e) => {
				warn!(error = %e, "connect attempt failed");
				CloseReason::Transient
			}
		};

		match ctrl.on_disconnect(reason) {
			ReconnectDecision::GiveUp => {
				return match reason {
					CloseReason::ClientRequested => Ok(()),
					_ => Err(ClientCoreError::Closed),
				};
			}
			ReconnectDecision::RetryAfter(delay) => {
				info!(attempt = ctrl.attempts(), delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
				tokio::time::sleep(delay).await;
			}
		}
	}
}
