//! Symmetric AEAD envelope
//!
//! XChaCha20-Poly1305 with a fresh random 24-byte nonce per seal. The
//! nonce travels inside the blob; the authentication tag is part of the
//! ciphertext. Opening with the wrong key or a tampered blob fails with
//! `CryptoError::Decryption`.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::errors::CryptoError;
use super::keys::SPACE_KEY_LEN;

/// XChaCha20 nonce size in bytes
pub const NONCE_LEN: usize = 24;

/// An AEAD-sealed payload with its embedded nonce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedBlob {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &[u8; SPACE_KEY_LEN], plaintext: &[u8]) -> Result<SealedBlob, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Decryption)?;

    Ok(SealedBlob { nonce, ciphertext })
}

/// Open a sealed blob; authentication failure maps to `Decryption`.
pub fn open(key: &[u8; SPACE_KEY_LEN], blob: &SealedBlob) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(&blob.nonce), blob.ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption)
}
