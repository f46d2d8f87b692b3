#![forbid(unsafe_code)]

use parley_domain::{Message, RoomId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Maximum accepted size of a single text frame.
pub const MAX_FRAME_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("frame decode error: {0}")]
	Decode(#[from] serde_json::Error),
}

/// Frames sent by a client over an established gateway connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
	JoinRoom {
		room_id: RoomId,
	},
	NewMessage {
		content: String,
	},
	LeaveRoom {
		room_id: RoomId,
	},
}

/// Frames sent by the gateway to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
	/// Point-to-point history snapshot sent on a successful join.
	MessageHistory {
		room_id: RoomId,
		messages: Vec<Message>,
	},
	/// A committed message broadcast to every connection joined to its room.
	NewMessage {
		#[serde(flatten)]
		message: Message,
	},
	Error {
		message: String,
	},
}

/// Encode a frame as a JSON text payload.
pub fn encode_frame<F: Serialize>(frame: &F) -> Result<String, ProtocolError> {
	let text = serde_json::to_string(frame)?;
	if text.len() > MAX_FRAME_SIZE {
		return Err(ProtocolError::FrameTooLarge {
			len: text.len(),
			max: MAX_FRAME_SIZE,
		});
	}
	Ok(text)
}

fn decode_frame<F: DeserializeOwned>(text: &str) -> Result<F, ProtocolError> {
	if text.len() > MAX_FRAME_SIZE {
		return Err(ProtocolError::FrameTooLarge {
			len: text.len(),
			max: MAX_FRAME_SIZE,
		});
	}
	Ok(serde_json::from_str(text)?)
}

/// Decode a client frame, enforcing the frame size guard before parsing.
pub fn decode_client_frame(text: &str) -> Result<ClientFrame, ProtocolError> {
	decode_frame(text)
}

/// Decode a server frame, enforcing the frame size guard before parsing.
pub fn decode_server_frame(text: &str) -> Result<ServerFrame, ProtocolError> {
	decode_frame(text)
}
