//! `SecretKey`: the symmetric AES key shared by the REST and push codecs.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::CryptoError;

/// An AES key of 16, 24 or 32 bytes.
///
/// The server hands keys out as base64 text (`zpw_enk` at login, `key` in the
/// push handshake); [`SecretKey::from_base64`] is the usual constructor.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    bytes: Vec<u8>,
}

impl SecretKey {
    /// Construct from raw key bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, CryptoError> {
        let bytes = bytes.into();
        match bytes.len() {
            16 | 24 | 32 => Ok(Self { bytes }),
            _ => Err(CryptoError::InvalidKey),
        }
    }

    /// Decode base64 key text.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD.decode(text.trim()).map_err(|_| CryptoError::InvalidKey)?;
        Self::from_bytes(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] { &self.bytes }

    /// Key length in bits (128, 192 or 256).
    pub fn bits(&self) -> usize { self.bytes.len() * 8 }

    /// Base64 text form, as carried on the wire.
    pub fn to_base64(&self) -> String { STANDARD.encode(&self.bytes) }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(aes-{})", self.bits())
    }
}

impl std::str::FromStr for SecretKey {
    type Err = CryptoError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::from_base64(s) }
}
