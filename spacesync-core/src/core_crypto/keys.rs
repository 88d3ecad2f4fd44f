//! Device and space key material
//!
//! Each installation carries one device keypair: an Ed25519 half for
//! detached signatures and an X25519 half for authenticated box
//! encryption to other devices. Each space carries one 256-bit symmetric
//! key shared by all members. Secret halves are zeroized on drop.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as ExchangePublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::errors::CryptoError;

/// AEAD key size in bytes (256 bits)
pub const SPACE_KEY_LEN: usize = 32;

/// Ed25519 signature length
pub const SIGNATURE_LEN: usize = 64;

/// Per-device asymmetric keypair: Ed25519 for signing, X25519 for boxes.
#[derive(Clone)]
pub struct DeviceKeypair {
    signing: SigningKey,
    exchange: StaticSecret,
}

/// Serialized form written to `device_keys.json`
#[derive(Serialize, Deserialize)]
pub struct StoredDeviceKeypair {
    pub signing_secret: String,
    pub exchange_secret: String,
}

impl DeviceKeypair {
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let exchange = StaticSecret::random_from_rng(OsRng);
        Self { signing, exchange }
    }

    /// Base64 Ed25519 public key; identifies this device as a signer.
    pub fn public_signing_key(&self) -> String {
        BASE64.encode(self.signing.verifying_key().as_bytes())
    }

    /// Base64 X25519 public key; recipients use it to box messages to us.
    pub fn public_exchange_key(&self) -> String {
        BASE64.encode(ExchangePublicKey::from(&self.exchange).as_bytes())
    }

    /// Detached Ed25519 signature over `msg`.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.signing.sign(msg).to_bytes().to_vec()
    }

    /// Verify a detached signature against a base64 public signing key.
    /// Never errors; any malformed input yields `false`.
    pub fn verify(signer: &str, msg: &[u8], sig: &[u8]) -> bool {
        let Ok(key_bytes) = BASE64.decode(signer) else {
            return false;
        };
        let key_bytes: [u8; 32] = match key_bytes.try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let Ok(verifying) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(sig) else {
            return false;
        };
        verifying.verify(msg, &signature).is_ok()
    }

    /// X25519 shared secret with another device's exchange key.
    pub fn shared_secret(&self, their_exchange_key: &str) -> Result<[u8; 32], CryptoError> {
        let bytes = BASE64
            .decode(their_exchange_key)
            .map_err(|e| CryptoError::InvalidKey(format!("bad exchange key encoding: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("exchange key must be 32 bytes".to_string()))?;
        let theirs = ExchangePublicKey::from(bytes);
        Ok(self.exchange.diffie_hellman(&theirs).to_bytes())
    }

    pub fn to_stored(&self) -> StoredDeviceKeypair {
        StoredDeviceKeypair {
            signing_secret: BASE64.encode(self.signing.to_bytes()),
            exchange_secret: BASE64.encode(self.exchange.to_bytes()),
        }
    }

    pub fn from_stored(stored: &StoredDeviceKeypair) -> Result<Self, CryptoError> {
        let signing_bytes: [u8; 32] = BASE64
            .decode(&stored.signing_secret)
            .map_err(|e| CryptoError::KeyStore(format!("bad signing key encoding: {}", e)))?
            .try_into()
            .map_err(|_| CryptoError::KeyStore("signing key must be 32 bytes".to_string()))?;
        let exchange_bytes: [u8; 32] = BASE64
            .decode(&stored.exchange_secret)
            .map_err(|e| CryptoError::KeyStore(format!("bad exchange key encoding: {}", e)))?
            .try_into()
            .map_err(|_| CryptoError::KeyStore("exchange key must be 32 bytes".to_string()))?;

        Ok(Self {
            signing: SigningKey::from_bytes(&signing_bytes),
            exchange: StaticSecret::from(exchange_bytes),
        })
    }
}

/// 256-bit symmetric space key, shared by all members of a space.
#[derive(Clone)]
pub struct SpaceKey(Zeroizing<[u8; SPACE_KEY_LEN]>);

impl SpaceKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SPACE_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        SpaceKey(Zeroizing::new(bytes))
    }

    /// Build a key from raw bytes; fails unless exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SPACE_KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "space key must be {} bytes, got {}",
                SPACE_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(SpaceKey(Zeroizing::new(bytes)))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::InvalidKey(format!("bad hex encoding: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_slice())
    }

    pub fn as_bytes(&self) -> &[u8; SPACE_KEY_LEN] {
        &self.0
    }
}
