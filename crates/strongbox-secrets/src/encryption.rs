//! Encryption at rest for stored secret versions.
//!
//! Values are sealed with ChaCha20-Poly1305 under a per-key data key derived
//! from the master key with BLAKE3. The sealed layout is
//! `nonce || ciphertext || tag`.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{BackendError, BackendResult, Error, Result};
use crate::types::{SecretKey, SecretValue};

/// Size of the encryption key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// A 256-bit symmetric key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::config(format!(
                "master key must be exactly {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Parses a hex-encoded key.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not 64 hex characters.
    pub fn from_hex(text: &str) -> Result<Self> {
        let mut raw = hex::decode(text.trim())
            .map_err(|e| Error::config(format!("master key is not valid hex: {e}")))?;
        let key = Self::from_bytes(&raw);
        raw.zeroize();
        key
    }

    /// Derives the data key for one secret key.
    #[must_use]
    pub fn derive_for_secret(&self, key: &SecretKey) -> Self {
        let context = format!("strongbox v1 data key {}", key.as_str());
        Self {
            bytes: blake3::derive_key(&context, &self.bytes),
        }
    }

    /// Encrypts a value for `key`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if encryption fails.
    pub fn seal(&self, key: &SecretKey, value: &SecretValue) -> BackendResult<Vec<u8>> {
        encrypt(&self.derive_for_secret(key), value.as_bytes())
    }

    /// Decrypts a value sealed for `key`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the data is truncated or fails authentication.
    pub fn open(&self, key: &SecretKey, sealed: &[u8]) -> BackendResult<SecretValue> {
        decrypt(&self.derive_for_secret(key), sealed).map(SecretValue::new)
    }

    #[cfg(test)]
    const fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

fn cipher(key: &MasterKey) -> BackendResult<ChaCha20Poly1305> {
    ChaCha20Poly1305::new_from_slice(&key.bytes)
        .map_err(|e| BackendError::storage(format!("failed to create cipher: {e}")))
}

fn encrypt(key: &MasterKey, plaintext: &[u8]) -> BackendResult<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher(key)?
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| BackendError::storage(format!("encryption failed: {e}")))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn decrypt(key: &MasterKey, sealed: &[u8]) -> BackendResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(BackendError::storage(format!(
            "ciphertext too short: expected at least {} bytes, got {}",
            NONCE_SIZE + TAG_SIZE,
            sealed.len()
        )));
    }

    let (nonce, body) = sealed.split_at(NONCE_SIZE);
    cipher(key)?
        .decrypt(Nonce::from_slice(nonce), body)
        .map_err(|e| BackendError::storage(format!("decryption failed: {e}")))
}
