//! Core types for the secret lifecycle core.
//!
//! - [`SecretKey`]: A validated logical secret key
//! - [`SecretValue`]: Plaintext secret bytes that zeroize on drop
//! - [`Version`]: A per-key, strictly increasing version number
//! - [`Classification`]: The kind of secret, driving generation and validation
//! - [`SecretMetadata`]: Rotation schedule, version pointer and tags
//! - [`SecretAttributes`]: Caller-supplied metadata on `set`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// A validated logical secret key such as `db/prod/primary`.
///
/// Secret keys must:
/// - Be between 1 and 253 characters
/// - Contain only lowercase alphanumerics, `-`, `_`, `.` and `/`
/// - Start with an alphanumeric character
/// - Not end with `/`, `-` or `.`
/// - Not contain an empty path segment (`//`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretKey(String);

impl SecretKey {
    /// Maximum length of a secret key.
    pub const MAX_LENGTH: usize = 253;

    /// Creates a new `SecretKey` after validating the input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the key is malformed.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<()> {
        let invalid = |reason: String| Error::InvalidKey { reason };

        let (Some(first), Some(last)) = (key.chars().next(), key.chars().last()) else {
            return Err(invalid("key cannot be empty".to_string()));
        };

        if key.len() > Self::MAX_LENGTH {
            return Err(invalid(format!(
                "key exceeds maximum length of {} characters",
                Self::MAX_LENGTH
            )));
        }

        if !first.is_ascii_alphanumeric() {
            return Err(invalid(
                "key must start with an alphanumeric character".to_string(),
            ));
        }

        if matches!(last, '/' | '-' | '.') {
            return Err(invalid(
                "key cannot end with a slash, hyphen or period".to_string(),
            ));
        }

        if key.contains("//") {
            return Err(invalid("key cannot contain an empty segment".to_string()));
        }

        if let Some(c) = key.chars().find(|c| {
            !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.' | '/'))
        }) {
            return Err(invalid(format!(
                "key contains invalid character '{c}'; only lowercase alphanumerics, '-', '_', '.' and '/' are allowed"
            )));
        }

        Ok(())
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SecretKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for SecretKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SecretKey> for String {
    fn from(key: SecretKey) -> Self {
        key.0
    }
}

impl AsRef<str> for SecretKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Plaintext secret bytes that are securely zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue {
    data: Vec<u8>,
}

impl SecretValue {
    /// Wraps raw bytes.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Wraps a UTF-8 string.
    #[must_use]
    pub fn from_string(value: String) -> Self {
        Self::new(value.into_bytes())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the value as UTF-8, if it is valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Returns the length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the value is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("len", &self.data.len())
            .field("data", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.data.ct_eq(&other.data).into()
    }
}

impl Eq for SecretValue {}

/// A per-key version number. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The first version of a key.
    pub const FIRST: Self = Self(1);

    /// Wraps a raw version number.
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Returns the raw number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the following version.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of secret a key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Database credential.
    DatabasePassword,
    /// API token.
    ApiKey,
    /// Symmetric JWT signing secret.
    JwtSigning,
    /// Anything else.
    #[default]
    Generic,
}

impl Classification {
    /// Returns the tag as written in configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DatabasePassword => "database-password",
            Self::ApiKey => "api-key",
            Self::JwtSigning => "jwt-signing",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "database-password" => Ok(Self::DatabasePassword),
            "api-key" => Ok(Self::ApiKey),
            "jwt-signing" => Ok(Self::JwtSigning),
            "generic" => Ok(Self::Generic),
            other => Err(Error::config(format!("unknown classification '{other}'"))),
        }
    }
}

/// Default rotation frequency: 90 days.
pub const DEFAULT_ROTATION_FREQUENCY_SECS: u64 = 90 * 24 * 60 * 60;

/// Converts a frequency in seconds to a signed duration, saturating.
pub(crate) fn frequency_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Metadata of a live secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    /// The secret key.
    pub key: SecretKey,
    /// The active version.
    pub version: Version,
    /// What kind of secret this is.
    pub classification: Classification,
    /// Rotation frequency in seconds.
    pub rotation_frequency_secs: u64,
    /// When the key was first written.
    pub created_at: DateTime<Utc>,
    /// When the key was last modified.
    pub updated_at: DateTime<Utc>,
    /// When the active version became active.
    pub last_rotated: DateTime<Utc>,
    /// When the next scheduled rotation is due. Never before `last_rotated`.
    pub next_rotation: DateTime<Utc>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl SecretMetadata {
    /// Returns true if a scheduled rotation is due at `now`.
    #[must_use]
    pub fn is_rotation_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_rotation
    }
}

/// Optional metadata supplied with a write.
///
/// Unset fields keep the key's current values, or take defaults for a new key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretAttributes {
    /// Classification tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Rotation frequency in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_frequency_secs: Option<u64>,
    /// Replacement tag map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl SecretAttributes {
    /// Creates empty attributes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the classification.
    #[must_use]
    pub const fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    /// Sets the rotation frequency.
    #[must_use]
    pub const fn with_rotation_frequency(mut self, frequency: std::time::Duration) -> Self {
        self.rotation_frequency_secs = Some(frequency.as_secs());
        self
    }

    /// Sets the rotation frequency in days.
    #[must_use]
    pub const fn with_rotation_days(mut self, days: u64) -> Self {
        self.rotation_frequency_secs = Some(days * 24 * 60 * 60);
        self
    }

    /// Adds a tag, replacing the tag map on write.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Lifecycle state of one stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// The version readers receive.
    Active,
    /// Written by a rotation, awaiting validation. Not readable.
    Staged,
    /// Previously active.
    Superseded,
    /// Rejected by validation. Kept for history, not readable.
    Failed,
}

impl VersionStatus {
    /// Returns true if readers may fetch this version explicitly.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        matches!(self, Self::Active | Self::Superseded)
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Staged => "staged",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// History entry for one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Version number.
    pub version: Version,
    /// Current status.
    pub status: VersionStatus,
    /// When the version was written.
    pub created_at: DateTime<Utc>,
}
