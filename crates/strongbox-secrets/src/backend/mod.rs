//! Backend adapters.
//!
//! A [`SecretBackend`] implements storage for one technology. Every call is
//! asynchronous and returns a classified [`BackendError`]. Two reference
//! adapters ship with the crate:
//!
//! - [`MemoryBackend`]: process-local, for tests and ephemeral deployments
//! - [`FileBackend`]: one encrypted JSON record per key in a directory
//!
//! [`RetryingBackend`] wraps any adapter and retries `Unreachable` failures
//! with bounded exponential backoff.
//!
//! Rotation stages a candidate with `set` (`activate = false`), then either
//! [`activate`](SecretBackend::activate)s or [`discard`](SecretBackend::discard)s
//! it, so a candidate is never served before validation passes.

mod file;
mod memory;
mod retry;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::BackendResult;
use crate::types::{
    DEFAULT_ROTATION_FREQUENCY_SECS, SecretAttributes, SecretKey, SecretMetadata, SecretValue,
    Version, VersionInfo,
};

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use retry::{RetryPolicy, RetryingBackend};

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'a>>;

/// A shared, type-erased backend.
pub type SharedBackend = Arc<dyn SecretBackend>;

/// A write of one new version.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    /// The plaintext value.
    pub value: SecretValue,
    /// Metadata changes. `None` keeps the current metadata.
    pub attributes: Option<SecretAttributes>,
    /// Reject the write unless this is the live version.
    pub expected_version: Option<Version>,
    /// Activate immediately. When false the version is staged.
    pub activate: bool,
    /// Write time; becomes `last_rotated` on activation.
    pub at: DateTime<Utc>,
    /// Rotation frequency for a key that does not exist yet.
    pub default_frequency_secs: u64,
}

impl WriteRequest {
    /// Creates an activating write.
    #[must_use]
    pub fn new(value: SecretValue, at: DateTime<Utc>) -> Self {
        Self {
            value,
            attributes: None,
            expected_version: None,
            activate: true,
            at,
            default_frequency_secs: DEFAULT_ROTATION_FREQUENCY_SECS,
        }
    }

    /// Creates a staging write used by rotation.
    #[must_use]
    pub fn staged(value: SecretValue, at: DateTime<Utc>) -> Self {
        Self {
            activate: false,
            ..Self::new(value, at)
        }
    }

    /// Sets metadata changes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: SecretAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Requires the live version to be `version`.
    #[must_use]
    pub const fn expecting(mut self, version: Option<Version>) -> Self {
        self.expected_version = version;
        self
    }

    /// Sets the rotation frequency used when the key is new.
    #[must_use]
    pub const fn with_default_frequency(mut self, secs: u64) -> Self {
        self.default_frequency_secs = secs;
        self
    }
}

/// Storage capability implemented once per secret-storage technology.
///
/// Implementations must be safe to call concurrently. The service serialises
/// mutations per key, so adapters only need to keep their own state
/// consistent.
pub trait SecretBackend: Send + Sync {
    /// Reads the active version, or a specific readable version.
    fn get<'a>(
        &'a self,
        key: &'a SecretKey,
        version: Option<Version>,
    ) -> BackendFuture<'a, SecretValue>;

    /// Writes a new version and returns its number.
    fn set<'a>(&'a self, key: &'a SecretKey, request: WriteRequest) -> BackendFuture<'a, Version>;

    /// Promotes a staged version to active and stamps the rotation time.
    fn activate<'a>(
        &'a self,
        key: &'a SecretKey,
        version: Version,
        at: DateTime<Utc>,
    ) -> BackendFuture<'a, SecretMetadata>;

    /// Marks a staged version as failed. The active version is untouched.
    fn discard<'a>(&'a self, key: &'a SecretKey, version: Version) -> BackendFuture<'a, ()>;

    /// Deletes a key. Reference adapters soft-delete with retention.
    fn delete<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, ()>;

    /// Lists live keys.
    fn list(&self) -> BackendFuture<'_, Vec<SecretKey>>;

    /// Reads metadata of a live key.
    fn get_metadata<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, SecretMetadata>;

    /// Returns the version history of a live key.
    fn history<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, Vec<VersionInfo>>;

    /// Permanently removes soft-deleted keys whose retention has elapsed.
    fn purge_deleted(&self, now: DateTime<Utc>) -> BackendFuture<'_, usize>;
}
