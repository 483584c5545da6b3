//! AES-CBC with an all-zero IV.
//!
//! Every REST `params` block and every REST response `data` field is
//! encrypted this way. The IV never changes, so identical plaintexts produce
//! identical ciphertexts; that is a property of the protocol, not of this code.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use aes::{Aes128, Aes192, Aes256};

use crate::{BLOCK_SIZE, CryptoError, SecretKey, pkcs7_pad, pkcs7_unpad};

/// The IV the protocol uses for every CBC operation.
pub const ZERO_IV: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

enum Block {
    A128(Aes128),
    A192(Aes192),
    A256(Aes256),
}

impl Block {
    fn new(key: &SecretKey) -> Result<Self, CryptoError> {
        let k = key.as_bytes();
        let c = match k.len() {
            16 => Self::A128(Aes128::new_from_slice(k).map_err(|_| CryptoError::InvalidKey)?),
            24 => Self::A192(Aes192::new_from_slice(k).map_err(|_| CryptoError::InvalidKey)?),
            32 => Self::A256(Aes256::new_from_slice(k).map_err(|_| CryptoError::InvalidKey)?),
            _  => return Err(CryptoError::InvalidKey),
        };
        Ok(c)
    }

    fn encrypt(&self, block: &mut [u8]) {
        let b = GenericArray::from_mut_slice(block);
        match self {
            Self::A128(c) => c.encrypt_block(b),
            Self::A192(c) => c.encrypt_block(b),
            Self::A256(c) => c.encrypt_block(b),
        }
    }

    fn decrypt(&self, block: &mut [u8]) {
        let b = GenericArray::from_mut_slice(block);
        match self {
            Self::A128(c) => c.decrypt_block(b),
            Self::A192(c) => c.decrypt_block(b),
            Self::A256(c) => c.decrypt_block(b),
        }
    }
}

/// Encrypt `buffer` in place. Length must be a multiple of 16.
pub fn cbc_encrypt(buffer: &mut [u8], key: &SecretKey, iv: &[u8; BLOCK_SIZE]) -> Result<(), CryptoError> {
    if buffer.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidBuffer);
    }
    let cipher = Block::new(key)?;
    let mut prev = *iv;
    for chunk in buffer.chunks_exact_mut(BLOCK_SIZE) {
        for (b, p) in chunk.iter_mut().zip(prev.iter()) { *b ^= p; }
        cipher.encrypt(chunk);
        prev.copy_from_slice(chunk);
    }
    Ok(())
}

/// Decrypt `buffer` in place. Length must be a non-zero multiple of 16.
pub fn cbc_decrypt(buffer: &mut [u8], key: &SecretKey, iv: &[u8; BLOCK_SIZE]) -> Result<(), CryptoError> {
    if buffer.is_empty() || buffer.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidBuffer);
    }
    let cipher = Block::new(key)?;
    let mut prev = *iv;
    for chunk in buffer.chunks_exact_mut(BLOCK_SIZE) {
        let mut saved = [0u8; BLOCK_SIZE];
        saved.copy_from_slice(chunk);
        cipher.decrypt(chunk);
        for (b, p) in chunk.iter_mut().zip(prev.iter()) { *b ^= p; }
        prev = saved;
    }
    Ok(())
}

/// Pad and encrypt `plaintext` with the zero IV.
pub fn seal(plaintext: &[u8], key: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    let mut buf = plaintext.to_vec();
    pkcs7_pad(&mut buf);
    cbc_encrypt(&mut buf, key, &ZERO_IV)?;
    Ok(buf)
}

/// Decrypt with the zero IV and strip padding.
pub fn open(ciphertext: &[u8], key: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    let mut buf = ciphertext.to_vec();
    cbc_decrypt(&mut buf, key, &ZERO_IV)?;
    pkcs7_unpad(&mut buf)?;
    Ok(buf)
}
