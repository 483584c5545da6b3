//! Cryptographic primitives for the Zalo Web protocol.
//!
//! Provides:
//! - [`SecretKey`]: 128/192/256-bit AES key carried as base64 on the wire
//! - AES-CBC with an all-zero IV and PKCS#7 padding (REST payloads)
//! - AES-GCM with a 16-byte nonce (push-channel payloads)
//! - gzip / zlib / raw-deflate inflation

#![deny(unsafe_code)]

pub mod cbc;
pub mod gcm;
mod inflate;
mod secret_key;

pub use inflate::inflate;
pub use secret_key::SecretKey;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Errors from the primitives in this crate.
#[derive(Clone, Debug, PartialEq)]
pub enum CryptoError {
    /// Key material is not valid base64 or not 16/24/32 bytes long.
    InvalidKey,
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// PKCS#7 padding is malformed (usually a key mismatch).
    BadPadding,
    /// The GCM authentication tag did not verify.
    AuthTagMismatch,
    /// None of the supported compression formats could inflate the data.
    Inflate,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey      => write!(f, "invalid key material"),
            Self::InvalidBuffer   => write!(f, "invalid ciphertext buffer length"),
            Self::BadPadding      => write!(f, "bad PKCS#7 padding"),
            Self::AuthTagMismatch => write!(f, "GCM authentication tag mismatch"),
            Self::Inflate         => write!(f, "decompression failed"),
        }
    }
}
impl std::error::Error for CryptoError {}

// ─── PKCS#7 ───────────────────────────────────────────────────────────────────

/// Append PKCS#7 padding up to the next multiple of [`BLOCK_SIZE`].
///
/// A full block of padding is added when `data` is already aligned.
pub fn pkcs7_pad(data: &mut Vec<u8>) {
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    data.extend(std::iter::repeat_n(pad as u8, pad));
}

/// Strip PKCS#7 padding in place.
pub fn pkcs7_unpad(data: &mut Vec<u8>) -> Result<(), CryptoError> {
    let pad = *data.last().ok_or(CryptoError::BadPadding)? as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return Err(CryptoError::BadPadding);
    }
    if !data[data.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(CryptoError::BadPadding);
    }
    data.truncate(data.len() - pad);
    Ok(())
}
