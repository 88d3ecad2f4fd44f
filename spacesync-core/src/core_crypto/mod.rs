//! Cryptography for spaces
//!
//! Leaf of the engine's dependency order: no knowledge of the sync layer
//! or the wire protocol. Supplies key lifecycle, invite packaging,
//! per-peer boxes, space-key AEAD sealing, and detached signatures.

mod errors;
mod keys;
mod manager;
mod sealed;

pub use errors::CryptoError;
pub use keys::{DeviceKeypair, SpaceKey, StoredDeviceKeypair, SIGNATURE_LEN, SPACE_KEY_LEN};
pub use manager::{EncryptionManager, Signed};
pub use sealed::{open, seal, SealedBlob, NONCE_LEN};
