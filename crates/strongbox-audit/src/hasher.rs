//! Keyed hashing of secret keys for audit records.
//!
//! Audit entries identify a secret only through a keyed BLAKE3 digest. Without
//! the hashing key the digest reveals nothing about the secret key, and even
//! with it the key can only be confirmed by hashing a candidate, never
//! recovered.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AuditError, Result};

/// Size of the hashing key in bytes.
pub const HASH_KEY_SIZE: usize = 32;

/// Hex-encoded keyed digest of a secret key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyHash(String);

impl KeyHash {
    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produces [`KeyHash`]es with a secret hashing key.
///
/// The key is securely zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyHasher {
    key: [u8; HASH_KEY_SIZE],
}

impl KeyHasher {
    /// Creates a hasher from raw key bytes.
    #[must_use]
    pub const fn from_bytes(key: [u8; HASH_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Creates a hasher from a hex-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid hex or has the wrong length.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut bytes = hex::decode(encoded.trim())
            .map_err(|e| AuditError::InvalidKey(format!("not valid hex: {e}")))?;
        if bytes.len() != HASH_KEY_SIZE {
            let len = bytes.len();
            bytes.zeroize();
            return Err(AuditError::InvalidKey(format!(
                "key must be exactly {HASH_KEY_SIZE} bytes, got {len}"
            )));
        }
        let mut key = [0u8; HASH_KEY_SIZE];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { key })
    }

    /// Generates a hasher with a random key.
    #[must_use]
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; HASH_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Hashes a secret key.
    #[must_use]
    pub fn hash(&self, secret_key: &str) -> KeyHash {
        KeyHash(blake3::keyed_hash(&self.key, secret_key.as_bytes()).to_hex().to_string())
    }
}

impl fmt::Debug for KeyHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHasher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash_is_deterministic() {
        let hasher = KeyHasher::from_bytes([3u8; HASH_KEY_SIZE]);
        assert_eq!(hasher.hash("db/prod"), hasher.hash("db/prod"));
        assert_ne!(hasher.hash("db/prod"), hasher.hash("db/staging"));
    }

    #[test]
    fn different_keys_produce_different_hashes() {
        let a = KeyHasher::from_bytes([1u8; HASH_KEY_SIZE]);
        let b = KeyHasher::from_bytes([2u8; HASH_KEY_SIZE]);
        assert_ne!(a.hash("db/prod"), b.hash("db/prod"));
    }

    #[test]
    fn from_hex_roundtrip() {
        let encoded = hex::encode([9u8; HASH_KEY_SIZE]);
        let hasher = KeyHasher::from_hex(&encoded).expect("valid key");
        let direct = KeyHasher::from_bytes([9u8; HASH_KEY_SIZE]);
        assert_eq!(hasher.hash("x"), direct.hash("x"));
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(KeyHasher::from_hex("zz").is_err());
        assert!(KeyHasher::from_hex(&hex::encode([1u8; 16])).is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let debug = format!("{:?}", KeyHasher::generate());
        assert!(debug.contains("[REDACTED]"));
    }

    proptest! {
        #[test]
        fn digest_never_contains_input(key in "[g-z]{8,32}") {
            let hasher = KeyHasher::from_bytes([5u8; HASH_KEY_SIZE]);
            let digest = hasher.hash(&key);
            prop_assert_eq!(digest.as_str().len(), 64);
            prop_assert!(!digest.as_str().contains(&key));
        }
    }
}
