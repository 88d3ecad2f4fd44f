//! Engine error types

use thiserror::Error;

use crate::core_crypto::CryptoError;
use crate::core_protocol::ProtocolError;
use crate::core_sync::SyncError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid invite: {0}")]
    InvalidInvite(String),

    #[error("invite expired")]
    InviteExpired,

    #[error("space already exists: {0}")]
    SpaceExists(String),

    #[error("space not found: {0}")]
    SpaceNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
