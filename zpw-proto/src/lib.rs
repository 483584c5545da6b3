//! Zalo Web wire layer.
//!
//! This crate handles:
//! * Push-frame headers (`version`, little-endian `command`, `sub_command`)
//! * Command classification for incoming frames
//! * The payload codec wrapping every REST request and push frame
//!
//! It is intentionally transport-agnostic: bring your own HTTP client and
//! WebSocket.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod command;
pub mod frame;

pub use codec::{DecodeError, EncodeError, EncryptMode, PushEnvelope, decode, decode_push_frame, encode};
pub use command::Command;
pub use frame::{FrameError, FrameHeader, PushFrame, keepalive_frame};

/// Protocol version sent as `zpw_ver` on every request.
pub const API_VERSION: u32 = 647;
/// Client type sent as `zpw_type` on every request (30 = web).
pub const API_TYPE: u32 = 30;
