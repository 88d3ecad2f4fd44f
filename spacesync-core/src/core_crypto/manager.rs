//! Per-space encryption manager
//!
//! Owns the device keypair and the space symmetric key, and supplies
//! every cryptographic primitive a space needs: invite packaging, direct
//! peer messages, operation sealing, and detached signatures. Raw key
//! bytes never leave this module except through the explicit
//! export/import surface.
//!
//! Persisted layout inside a space's data directory:
//! - `device_keys.json` — device keypair (base64 fields)
//! - `space.key` — raw 32-byte space key
//! - `peer_keys.json` — known peer public keys

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::errors::CryptoError;
use super::keys::{DeviceKeypair, SpaceKey, StoredDeviceKeypair, SPACE_KEY_LEN};
use super::sealed::{open, seal, SealedBlob};

const DEVICE_KEYS_FILE: &str = "device_keys.json";
const SPACE_KEY_FILE: &str = "space.key";
const PEER_KEYS_FILE: &str = "peer_keys.json";

/// HKDF info label for the box key derivation
const BOX_KEY_LABEL: &[u8] = b"spacesync box v1";

/// A payload carrying a detached signature and the signer's public key.
///
/// The signature covers the canonical (bincode) serialization of the
/// payload alone; the signature fields themselves are excluded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signed<T> {
    pub payload: T,
    pub signature: Vec<u8>,
    pub signer: String,
}

impl<T: Serialize> Signed<T> {
    /// Verify the signature. Never errors; any failure yields `false`.
    pub fn verify(&self) -> bool {
        match bincode::serialize(&self.payload) {
            Ok(bytes) => DeviceKeypair::verify(&self.signer, &bytes, &self.signature),
            Err(_) => false,
        }
    }
}

struct Inner {
    device: DeviceKeypair,
    space_key: SpaceKey,
    peer_keys: HashMap<String, String>,
}

/// Key lifecycle and encrypt/decrypt/sign/verify primitives for one space.
pub struct EncryptionManager {
    data_dir: PathBuf,
    inner: RwLock<Inner>,
}

impl EncryptionManager {
    /// Load persisted key material from `data_dir`, generating and
    /// persisting anything absent. Idempotent: a second call reloads the
    /// same keys.
    pub async fn initialize(data_dir: impl Into<PathBuf>) -> Result<Self, CryptoError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;

        let device = load_or_generate_device(&data_dir).await?;
        let space_key = load_or_generate_space_key(&data_dir).await?;
        let peer_keys = load_peer_keys(&data_dir).await?;

        debug!(dir = %data_dir.display(), "encryption manager initialized");

        Ok(Self {
            data_dir,
            inner: RwLock::new(Inner {
                device,
                space_key,
                peer_keys,
            }),
        })
    }

    /// Base64 Ed25519 public key identifying this device as a signer.
    pub async fn device_public_key(&self) -> String {
        self.inner.read().await.device.public_signing_key()
    }

    /// Base64 X25519 public key other devices box messages to.
    pub async fn device_exchange_key(&self) -> String {
        self.inner.read().await.device.public_exchange_key()
    }

    /// Seal invite data under the space key. Returns a base64 blob
    /// suitable for embedding in an invite URI.
    pub async fn encrypt_invite<T: Serialize>(&self, invite: &T) -> Result<String, CryptoError> {
        let plaintext =
            serde_json::to_vec(invite).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        let inner = self.inner.read().await;
        let blob = seal(inner.space_key.as_bytes(), &plaintext)?;
        let framed =
            bincode::serialize(&blob).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        Ok(BASE64.encode(framed))
    }

    /// Open a base64 invite blob with the space key.
    pub async fn decrypt_invite<T: DeserializeOwned>(&self, blob: &str) -> Result<T, CryptoError> {
        let framed = BASE64
            .decode(blob)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        let blob: SealedBlob =
            bincode::deserialize(&framed).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        let inner = self.inner.read().await;
        let plaintext = open(inner.space_key.as_bytes(), &blob)?;
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Authenticated box to one recipient: X25519 ECDH with our exchange
    /// secret and their public key, HKDF-SHA256, then XChaCha20-Poly1305.
    pub async fn encrypt_message<T: Serialize>(
        &self,
        message: &T,
        recipient_exchange_key: &str,
    ) -> Result<SealedBlob, CryptoError> {
        let plaintext =
            bincode::serialize(message).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        let inner = self.inner.read().await;
        let key = derive_box_key(inner.device.shared_secret(recipient_exchange_key)?);
        seal(&key, &plaintext)
    }

    /// Open a box from a known sender; fails with `Decryption` when the
    /// sender key does not match the ciphertext.
    pub async fn decrypt_message<T: DeserializeOwned>(
        &self,
        message: &SealedBlob,
        sender_exchange_key: &str,
    ) -> Result<T, CryptoError> {
        let inner = self.inner.read().await;
        let key = derive_box_key(inner.device.shared_secret(sender_exchange_key)?);
        let plaintext = open(&key, message)?;
        bincode::deserialize(&plaintext).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Seal any protocol payload under the space key. All space members
    /// share that key, so this is the envelope for every wire message.
    pub async fn encrypt_operation<T: Serialize>(&self, value: &T) -> Result<SealedBlob, CryptoError> {
        let plaintext =
            bincode::serialize(value).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        let inner = self.inner.read().await;
        seal(inner.space_key.as_bytes(), &plaintext)
    }

    /// Open a payload sealed under the space key.
    pub async fn decrypt_operation<T: DeserializeOwned>(
        &self,
        blob: &SealedBlob,
    ) -> Result<T, CryptoError> {
        let inner = self.inner.read().await;
        let plaintext = open(inner.space_key.as_bytes(), blob)?;
        bincode::deserialize(&plaintext).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Attach a detached signature and our signer identity to `payload`.
    pub async fn sign_operation<T: Serialize>(&self, payload: T) -> Result<Signed<T>, CryptoError> {
        let bytes =
            bincode::serialize(&payload).map_err(|e| CryptoError::Signature(e.to_string()))?;
        let inner = self.inner.read().await;
        let signature = inner.device.sign(&bytes);
        let signer = inner.device.public_signing_key();
        Ok(Signed {
            payload,
            signature,
            signer,
        })
    }

    /// Verify a signed payload. Never errors.
    pub fn verify_operation<T: Serialize>(&self, signed: &Signed<T>) -> bool {
        signed.verify()
    }

    /// Replace the space symmetric key. Redistribution to other members
    /// is the caller's responsibility and happens out-of-band.
    pub async fn rekey_space(&self) -> Result<(), CryptoError> {
        let new_key = SpaceKey::generate();
        tokio::fs::write(self.data_dir.join(SPACE_KEY_FILE), new_key.as_bytes()).await?;
        self.inner.write().await.space_key = new_key;
        info!("space rekeyed");
        Ok(())
    }

    /// Hex dump of the space key, for backup or out-of-band transfer.
    pub async fn export_space_key(&self) -> String {
        self.inner.read().await.space_key.to_hex()
    }

    /// Install a space key received out-of-band. Fails with `InvalidKey`
    /// unless the decoded length is exactly the AEAD key size.
    pub async fn import_space_key(&self, hex_key: &str) -> Result<(), CryptoError> {
        let key = SpaceKey::from_hex(hex_key)?;
        tokio::fs::write(self.data_dir.join(SPACE_KEY_FILE), key.as_bytes()).await?;
        self.inner.write().await.space_key = key;
        info!("space key imported");
        Ok(())
    }

    /// Record (and persist) a peer's public key.
    pub async fn add_peer_key(&self, peer_id: &str, public_key: &str) -> Result<(), CryptoError> {
        let mut inner = self.inner.write().await;
        inner
            .peer_keys
            .insert(peer_id.to_string(), public_key.to_string());
        let raw = serde_json::to_vec_pretty(&inner.peer_keys)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        tokio::fs::write(self.data_dir.join(PEER_KEYS_FILE), raw).await?;
        Ok(())
    }

    /// Look up a peer's recorded public key.
    pub async fn peer_key(&self, peer_id: &str) -> Option<String> {
        self.inner.read().await.peer_keys.get(peer_id).cloned()
    }
}

fn derive_box_key(shared_secret: [u8; 32]) -> [u8; SPACE_KEY_LEN] {
    let hkdf = Hkdf::<Sha256>::new(None, &shared_secret);
    let mut key = [0u8; SPACE_KEY_LEN];
    // Expand cannot fail for a 32-byte output
    hkdf.expand(BOX_KEY_LABEL, &mut key)
        .unwrap_or_else(|_| unreachable!("32 bytes is a valid HKDF output length"));
    key
}

async fn load_or_generate_device(data_dir: &Path) -> Result<DeviceKeypair, CryptoError> {
    let path = data_dir.join(DEVICE_KEYS_FILE);
    if path.exists() {
        let raw = tokio::fs::read(&path).await?;
        let stored: StoredDeviceKeypair = serde_json::from_slice(&raw)
            .map_err(|e| CryptoError::KeyStore(format!("corrupt device key file: {}", e)))?;
        DeviceKeypair::from_stored(&stored)
    } else {
        let device = DeviceKeypair::generate();
        let raw = serde_json::to_vec_pretty(&device.to_stored())
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        tokio::fs::write(&path, raw).await?;
        info!("generated new device keypair");
        Ok(device)
    }
}

async fn load_or_generate_space_key(data_dir: &Path) -> Result<SpaceKey, CryptoError> {
    let path = data_dir.join(SPACE_KEY_FILE);
    if path.exists() {
        let raw = tokio::fs::read(&path).await?;
        SpaceKey::from_bytes(&raw)
            .map_err(|_| CryptoError::KeyStore("corrupt space key file".to_string()))
    } else {
        let key = SpaceKey::generate();
        tokio::fs::write(&path, key.as_bytes()).await?;
        info!("generated new space key");
        Ok(key)
    }
}

async fn load_peer_keys(data_dir: &Path) -> Result<HashMap<String, String>, CryptoError> {
    let path = data_dir.join(PEER_KEYS_FILE);
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = tokio::fs::read(&path).await?;
    serde_json::from_slice(&raw)
        .map_err(|e| CryptoError::KeyStore(format!("corrupt peer key file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Record {
        name: String,
        value: u64,
    }

    fn record() -> Record {
        Record {
            name: "request.http".to_string(),
            value: 42,
        }
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let first = EncryptionManager::initialize(dir.path()).await.unwrap();
        let device_key = first.device_public_key().await;
        let space_key = first.export_space_key().await;
        drop(first);

        let second = EncryptionManager::initialize(dir.path()).await.unwrap();
        assert_eq!(second.device_public_key().await, device_key);
        assert_eq!(second.export_space_key().await, space_key);
    }

    #[tokio::test]
    async fn corrupt_device_keys_fail_initialization() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(DEVICE_KEYS_FILE), b"not json")
            .await
            .unwrap();
        let result = EncryptionManager::initialize(dir.path()).await;
        assert!(matches!(result, Err(CryptoError::KeyStore(_))));
    }

    #[tokio::test]
    async fn invite_round_trip() {
        let dir = TempDir::new().unwrap();
        let manager = EncryptionManager::initialize(dir.path()).await.unwrap();

        let blob = manager.encrypt_invite(&record()).await.unwrap();
        let decrypted: Record = manager.decrypt_invite(&blob).await.unwrap();
        assert_eq!(decrypted, record());
    }

    #[tokio::test]
    async fn invite_fails_under_different_space_key() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let alice = EncryptionManager::initialize(dir_a.path()).await.unwrap();
        let mallory = EncryptionManager::initialize(dir_b.path()).await.unwrap();

        let blob = alice.encrypt_invite(&record()).await.unwrap();
        let result: Result<Record, _> = mallory.decrypt_invite(&blob).await;
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[tokio::test]
    async fn message_box_round_trip() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let alice = EncryptionManager::initialize(dir_a.path()).await.unwrap();
        let bob = EncryptionManager::initialize(dir_b.path()).await.unwrap();

        let boxed = alice
            .encrypt_message(&record(), &bob.device_exchange_key().await)
            .await
            .unwrap();
        let received: Record = bob
            .decrypt_message(&boxed, &alice.device_exchange_key().await)
            .await
            .unwrap();
        assert_eq!(received, record());
    }

    #[tokio::test]
    async fn message_box_rejects_wrong_sender() {
        let dirs: Vec<TempDir> = (0..3).map(|_| TempDir::new().unwrap()).collect();
        let alice = EncryptionManager::initialize(dirs[0].path()).await.unwrap();
        let bob = EncryptionManager::initialize(dirs[1].path()).await.unwrap();
        let carol = EncryptionManager::initialize(dirs[2].path()).await.unwrap();

        let boxed = alice
            .encrypt_message(&record(), &bob.device_exchange_key().await)
            .await
            .unwrap();
        let result: Result<Record, _> = bob
            .decrypt_message(&boxed, &carol.device_exchange_key().await)
            .await;
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[tokio::test]
    async fn sign_then_verify() {
        let dir = TempDir::new().unwrap();
        let manager = EncryptionManager::initialize(dir.path()).await.unwrap();

        let signed = manager.sign_operation(record()).await.unwrap();
        assert!(manager.verify_operation(&signed));
        assert_eq!(signed.signer, manager.device_public_key().await);
    }

    #[tokio::test]
    async fn mutated_payload_fails_verification() {
        let dir = TempDir::new().unwrap();
        let manager = EncryptionManager::initialize(dir.path()).await.unwrap();

        let mut signed = manager.sign_operation(record()).await.unwrap();
        signed.payload.value += 1;
        assert!(!signed.verify());
    }

    #[tokio::test]
    async fn rekey_invalidates_old_ciphertext() {
        let dir = TempDir::new().unwrap();
        let manager = EncryptionManager::initialize(dir.path()).await.unwrap();

        let old_blob = manager.encrypt_operation(&record()).await.unwrap();
        manager.rekey_space().await.unwrap();

        let result: Result<Record, _> = manager.decrypt_operation(&old_blob).await;
        assert!(matches!(result, Err(CryptoError::Decryption)));

        let new_blob = manager.encrypt_operation(&record()).await.unwrap();
        let decrypted: Record = manager.decrypt_operation(&new_blob).await.unwrap();
        assert_eq!(decrypted, record());
    }

    #[tokio::test]
    async fn space_key_export_import() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let alice = EncryptionManager::initialize(dir_a.path()).await.unwrap();
        let bob = EncryptionManager::initialize(dir_b.path()).await.unwrap();

        bob.import_space_key(&alice.export_space_key().await)
            .await
            .unwrap();

        let blob = alice.encrypt_operation(&record()).await.unwrap();
        let decrypted: Record = bob.decrypt_operation(&blob).await.unwrap();
        assert_eq!(decrypted, record());
    }

    #[tokio::test]
    async fn import_rejects_bad_length() {
        let dir = TempDir::new().unwrap();
        let manager = EncryptionManager::initialize(dir.path()).await.unwrap();
        let result = manager.import_space_key("deadbeef").await;
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn peer_keys_persist() {
        let dir = TempDir::new().unwrap();
        let manager = EncryptionManager::initialize(dir.path()).await.unwrap();
        manager.add_peer_key("peer-1", "key-material").await.unwrap();
        drop(manager);

        let reloaded = EncryptionManager::initialize(dir.path()).await.unwrap();
        assert_eq!(
            reloaded.peer_key("peer-1").await,
            Some("key-material".to_string())
        );
        assert_eq!(reloaded.peer_key("peer-2").await, None);
    }
}

#[cfg(test)]
mod signature_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Flipping any single byte of the canonical signed bytes must
        /// invalidate the signature.
        #[test]
        fn single_byte_mutation_breaks_signature(index in 0usize..64, mask in 1u8..=255) {
            let device = DeviceKeypair::generate();
            let payload: Vec<u8> = (0..64).map(|i| i as u8).collect();
            let bytes = bincode::serialize(&payload).unwrap();
            let signature = device.sign(&bytes);
            let signer = device.public_signing_key();

            prop_assert!(DeviceKeypair::verify(&signer, &bytes, &signature));

            let mut mutated = bytes.clone();
            let target = index % mutated.len();
            mutated[target] ^= mask;
            prop_assert!(!DeviceKeypair::verify(&signer, &mutated, &signature));
        }
    }
}
