//! Protocol error types

use thiserror::Error;

use crate::core_crypto::CryptoError;
use crate::core_sync::SyncError;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),
}
