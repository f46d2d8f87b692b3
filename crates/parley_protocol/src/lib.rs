#![forbid(unsafe_code)]

pub mod frames;

pub use frames::{
	ClientFrame, MAX_FRAME_SIZE, ProtocolError, ServerFrame, decode_client_frame, decode_server_frame, encode_frame,
};

/// Protocol version constants.
pub mod version {
	/// Current protocol major version (v1).
	pub const PROTOCOL_MAJOR: u32 = 1;
	/// Current protocol minor version.
	pub const PROTOCOL_MINOR: u32 = 0;
}
