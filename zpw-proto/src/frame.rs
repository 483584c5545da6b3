//! Push-frame framing.
//!
//! Every binary WebSocket frame starts with a fixed 4-byte header:
//!
//! ```text
//! [version: u8][command: u16 LE][sub_command: u8][body: UTF-8 JSON ...]
//! ```

use std::fmt;

use serde_json::Value;

use crate::codec::PushEnvelope;

/// Length of the fixed frame header.
pub const HEADER_LEN: usize = 4;

// ─── FrameError ───────────────────────────────────────────────────────────────

/// A frame that could not be split into header and envelope.
#[derive(Debug)]
pub enum FrameError {
    /// Fewer than [`HEADER_LEN`] bytes.
    TooShort(usize),
    /// Body is not valid UTF-8.
    Utf8(std::str::Utf8Error),
    /// Body is not a JSON object of the expected shape.
    Json(serde_json::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(n) => write!(f, "frame too short: {n} bytes"),
            Self::Utf8(e)     => write!(f, "frame body is not UTF-8: {e}"),
            Self::Json(e)     => write!(f, "frame body is not a JSON envelope: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

// ─── FrameHeader ──────────────────────────────────────────────────────────────

/// The `(version, command, sub_command)` triple at the front of every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    /// Frame format version, currently always 1.
    pub version:     u8,
    /// Command id.
    pub command:     u16,
    /// Command variant.
    pub sub_command: u8,
}

impl FrameHeader {
    /// Build a header.
    pub const fn new(version: u8, command: u16, sub_command: u8) -> Self {
        Self { version, command, sub_command }
    }

    /// Parse the first [`HEADER_LEN`] bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::TooShort(buf.len()));
        }
        Ok(Self {
            version:     buf[0],
            command:     u16::from_le_bytes([buf[1], buf[2]]),
            sub_command: buf[3],
        })
    }

    /// Wire form.
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let [lo, hi] = self.command.to_le_bytes();
        [self.version, lo, hi, self.sub_command]
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.version, self.command, self.sub_command)
    }
}

// ─── PushFrame ────────────────────────────────────────────────────────────────

/// A received frame: header plus the parsed JSON body.
#[derive(Clone, Debug)]
pub struct PushFrame {
    /// Parsed header.
    pub header: FrameHeader,
    /// Body as sent, before envelope interpretation.
    pub body:   Value,
}

impl PushFrame {
    /// Split a raw binary frame into header and JSON body.
    ///
    /// A header with no body (or only whitespace) decodes with a null body;
    /// see [`is_empty`](Self::is_empty).
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let header = FrameHeader::parse(buf)?;
        let text = std::str::from_utf8(&buf[HEADER_LEN..]).map_err(FrameError::Utf8)?;
        if text.trim().is_empty() {
            return Ok(Self { header, body: Value::Null });
        }
        let body = serde_json::from_str(text).map_err(FrameError::Json)?;
        Ok(Self { header, body })
    }

    /// `true` when the frame carried no body at all.
    pub fn is_empty(&self) -> bool {
        self.body.is_null()
    }

    /// Keepalive echoes carry an `eventId` and nothing else of interest.
    pub fn is_keepalive_echo(&self) -> bool {
        self.body.get("eventId").is_some()
    }

    /// The handshake key carried by a HELLO frame, if present and non-empty.
    pub fn handshake_key(&self) -> Option<&str> {
        self.body.get("key").and_then(Value::as_str).filter(|k| !k.is_empty())
    }

    /// Interpret the body as a data envelope.
    pub fn envelope(&self) -> Result<PushEnvelope, FrameError> {
        PushEnvelope::deserialize_from(&self.body).map_err(FrameError::Json)
    }
}

/// Header of the keepalive frame sent by the client.
pub const KEEPALIVE_HEADER: FrameHeader = FrameHeader::new(1, 2, 1);

/// Build the keepalive frame: header followed by `{"eventId": <event_id>}`.
pub fn keepalive_frame(event_id: i64) -> Vec<u8> {
    let body = serde_json::json!({ "eventId": event_id }).to_string();
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&KEEPALIVE_HEADER.to_bytes());
    out.extend_from_slice(body.as_bytes());
    out
}

/// Build a full frame from a header and JSON body. Used by servers and tests.
pub fn encode_frame(header: FrameHeader, body: &Value) -> Vec<u8> {
    let text = body.to_string();
    let mut out = Vec::with_capacity(HEADER_LEN + text.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}
