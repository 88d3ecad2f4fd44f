//! Peer-to-peer collection synchronization
//!
//! Keeps a directory of request collections identical across devices
//! without a server. Each space has its own symmetric key; every
//! operation is signed by its author and sealed before it touches a
//! transport. The crate is layered bottom-up: `core_crypto` for key
//! material and sealing, `core_sync` for the operation model and the
//! filesystem, `core_protocol` for peer reconciliation, and
//! `core_engine` for composition and lifecycle.

pub mod config;
pub mod core_crypto;
pub mod core_engine;
pub mod core_protocol;
pub mod core_sync;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::EngineConfig;
pub use core_crypto::EncryptionManager;
pub use core_engine::{Space, SpaceEvent, SyncEngine};
pub use core_protocol::{PeerId, SyncProtocol};
pub use core_sync::{Operation, SyncLayer, SyncMode};
pub use logging::{init_logging, LogLevel};
