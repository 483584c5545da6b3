//! Error types for zpw-client.

use std::{fmt, io};

use zpw_proto::{DecodeError, EncodeError};

// ─── RemoteError ──────────────────────────────────────────────────────────────

/// Code used when a call succeeds on the wire but carries no result.
pub const EMPTY_RESULT_CODE: i64 = 1337;

/// An error reported by the server in an RPC response.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteError {
    /// The `error_code` field.
    pub code:    i64,
    /// The `error_message` field, empty when absent.
    pub message: String,
}

impl RemoteError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// The sentinel returned for calls whose decoded result is empty.
    pub fn empty_result() -> Self {
        Self::new(EMPTY_RESULT_CODE, "Data is None")
    }

    /// `true` for the empty-result sentinel.
    pub fn is_empty_result(&self) -> bool {
        self.code == EMPTY_RESULT_CODE
    }

    pub(crate) fn from_body(body: &serde_json::Value, code: i64) -> Self {
        let message = body
            .get("error_message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        Self::new(code, message)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error #{}", self.code)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

// ─── Error ────────────────────────────────────────────────────────────────────

/// The error type returned from any `Client` method that talks to the server.
#[derive(Debug)]
pub enum Error {
    /// The server rejected the request.
    Remote(RemoteError),
    /// Request params could not be encrypted.
    Encode(EncodeError),
    /// The response could not be decrypted or parsed.
    Decode(DecodeError),
    /// A caller-supplied value is out of range.
    InvalidArgument(String),
    /// HTTP transport failure.
    Http(reqwest::Error),
    /// File or session-store I/O failure.
    Io(io::Error),
    /// A response body was not the JSON shape expected.
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(e)          => write!(f, "{e}"),
            Self::Encode(e)          => write!(f, "encode error: {e}"),
            Self::Decode(e)          => write!(f, "decode error: {e}"),
            Self::InvalidArgument(s) => write!(f, "invalid argument: {s}"),
            Self::Http(e)            => write!(f, "HTTP error: {e}"),
            Self::Io(e)              => write!(f, "I/O error: {e}"),
            Self::Json(e)            => write!(f, "malformed response: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self { Self::Remote(e) }
}
impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self { Self::Encode(e) }
}
impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self { Self::Decode(e) }
}
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self { Self::Http(e) }
}
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self { Self::Io(e) }
}
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self { Self::Json(e) }
}

impl Error {
    /// The server error, if this is one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(e) => Some(e),
            _               => None,
        }
    }
}

// ─── LoginError ───────────────────────────────────────────────────────────────

/// Errors returned by [`crate::Client::login`].
#[derive(Debug)]
pub enum LoginError {
    /// No cookies were supplied and no other credential path exists.
    UnsupportedMethod,
    /// The login response did not carry a secret key.
    MissingSecretKey,
    /// The server rejected the login.
    Remote(RemoteError),
    /// Any other error.
    Other(Error),
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedMethod => write!(f, "login method is not supported yet"),
            Self::MissingSecretKey  => write!(f, "unable to obtain secret key"),
            Self::Remote(e)         => write!(f, "{e} when logging in"),
            Self::Other(e)          => write!(f, "login failed: {e}"),
        }
    }
}

impl std::error::Error for LoginError {}

impl From<Error> for LoginError {
    fn from(e: Error) -> Self {
        match e {
            Error::Remote(r) => Self::Remote(r),
            other            => Self::Other(other),
        }
    }
}

impl From<reqwest::Error> for LoginError {
    fn from(e: reqwest::Error) -> Self { Self::Other(Error::Http(e)) }
}

// ─── LinkError ────────────────────────────────────────────────────────────────

/// Why a single push connection ended. Passed to the reconnect policy.
#[derive(Debug)]
pub enum LinkError {
    /// WebSocket handshake or transport failure.
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    /// The server closed the connection.
    Closed,
    /// Nothing was received within the read timeout.
    Timeout,
    /// The session has no push endpoint to connect to.
    NoEndpoint,
    /// A polling call failed.
    Rpc(Error),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket(e) => write!(f, "websocket: {e}"),
            Self::Closed       => write!(f, "connection closed by server"),
            Self::Timeout      => write!(f, "read timed out"),
            Self::NoEndpoint   => write!(f, "no push endpoint available"),
            Self::Rpc(e)       => write!(f, "poll failed: {e}"),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self { Self::WebSocket(Box::new(e)) }
}

impl From<Error> for LinkError {
    fn from(e: Error) -> Self { Self::Rpc(e) }
}

// ─── ChannelFault ─────────────────────────────────────────────────────────────

/// Why a push channel stopped or could not start.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelFault {
    /// The account was opened in another session; the local session is invalidated.
    SessionTakeover,
    /// The reconnect policy gave up.
    ReconnectsExhausted {
        attempts:   u32,
        last_error: String,
    },
    /// The session has no cookies or secret key.
    NotLoggedIn,
    /// A stopped loop has not finished winding down; nothing was started.
    Stopping,
}

impl fmt::Display for ChannelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionTakeover => write!(f, "another connection is opened, closing this one"),
            Self::ReconnectsExhausted { attempts, last_error } => {
                write!(f, "gave up after {attempts} reconnect attempts: {last_error}")
            }
            Self::NotLoggedIn => write!(f, "not logged in"),
            Self::Stopping    => write!(f, "previous listen loop is still stopping"),
        }
    }
}

impl std::error::Error for ChannelFault {}
