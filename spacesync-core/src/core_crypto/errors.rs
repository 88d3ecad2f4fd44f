//! Cryptographic error types
//!
//! Every failure here is local and non-retryable: a wrong key or a
//! tampered ciphertext does not get better by trying again. Callers at
//! the message boundary drop the offending input; key-store failures
//! during initialization are fatal to the space.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// On-disk key material is unreadable or corrupt
    #[error("key store error: {0}")]
    KeyStore(String),

    /// AEAD authentication failed (wrong key or tampered ciphertext)
    #[error("decryption failed")]
    Decryption,

    /// A signature could not be produced
    #[error("signing failed: {0}")]
    Signature(String),

    /// Imported or parsed key material has the wrong shape
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}
