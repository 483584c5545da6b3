//! AES-GCM with a 16-byte nonce, as used by encrypted push frames.
//!
//! Push payloads are laid out as `iv(16) || aad(16) || ciphertext || tag(16)`;
//! splitting that layout is the codec's job, this module only runs the AEAD.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::AesGcm;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;

use crate::{CryptoError, SecretKey};

/// Nonce length used by the push channel.
pub const NONCE_LEN: usize = 16;
/// Authentication tag length.
pub const TAG_LEN: usize = 16;

type Gcm128 = AesGcm<Aes128, U16>;
type Gcm192 = AesGcm<Aes192, U16>;
type Gcm256 = AesGcm<Aes256, U16>;

/// Decrypt and verify `ciphertext || tag`.
pub fn open(
    key:        &SecretKey,
    nonce:      &[u8; NONCE_LEN],
    aad:        &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::InvalidBuffer);
    }
    let nonce = GenericArray::from_slice(nonce);
    let payload = Payload { msg: ciphertext, aad };
    let k = key.as_bytes();
    let out = match k.len() {
        16 => Gcm128::new_from_slice(k).map_err(|_| CryptoError::InvalidKey)?.decrypt(nonce, payload),
        24 => Gcm192::new_from_slice(k).map_err(|_| CryptoError::InvalidKey)?.decrypt(nonce, payload),
        32 => Gcm256::new_from_slice(k).map_err(|_| CryptoError::InvalidKey)?.decrypt(nonce, payload),
        _  => return Err(CryptoError::InvalidKey),
    };
    out.map_err(|_| CryptoError::AuthTagMismatch)
}

/// Encrypt `plaintext`, returning `ciphertext || tag`.
///
/// The server side of the protocol does this; the client only needs it to
/// build test frames and fixtures.
pub fn seal(
    key:       &SecretKey,
    nonce:     &[u8; NONCE_LEN],
    aad:       &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let nonce = GenericArray::from_slice(nonce);
    let payload = Payload { msg: plaintext, aad };
    let k = key.as_bytes();
    let out = match k.len() {
        16 => Gcm128::new_from_slice(k).map_err(|_| CryptoError::InvalidKey)?.encrypt(nonce, payload),
        24 => Gcm192::new_from_slice(k).map_err(|_| CryptoError::InvalidKey)?.encrypt(nonce, payload),
        32 => Gcm256::new_from_slice(k).map_err(|_| CryptoError::InvalidKey)?.encrypt(nonce, payload),
        _  => return Err(CryptoError::InvalidKey),
    };
    out.map_err(|_| CryptoError::InvalidBuffer)
}
