//! In-memory backend adapter.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{BackendFuture, SecretBackend, WriteRequest};
use crate::encryption::MasterKey;
use crate::error::{BackendError, BackendResult};
use crate::record::SecretRecord;
use crate::types::{SecretKey, SecretMetadata, SecretValue, Version, VersionInfo};

/// Process-local backend. Values are sealed even in memory.
///
/// Failures can be injected with [`set_unreachable`](Self::set_unreachable)
/// and [`push_failure`](Self::push_failure) to exercise retry and rollback
/// paths.
pub struct MemoryBackend {
    master: MasterKey,
    retention: TimeDelta,
    records: RwLock<HashMap<SecretKey, SecretRecord>>,
    unreachable: RwLock<Option<String>>,
    injected: Mutex<VecDeque<BackendError>>,
}

impl MemoryBackend {
    /// Creates an empty backend. Deleted keys are purged immediately on
    /// [`purge_deleted`](SecretBackend::purge_deleted).
    ///
    /// Purged keys leave a tombstone behind so their version numbers are
    /// never handed out again.
    #[must_use]
    pub fn new(master: MasterKey) -> Self {
        Self::with_retention(master, TimeDelta::zero())
    }

    /// Creates an empty backend keeping soft-deleted keys for `retention`.
    #[must_use]
    pub fn with_retention(master: MasterKey, retention: TimeDelta) -> Self {
        Self {
            master,
            retention,
            records: RwLock::new(HashMap::new()),
            unreachable: RwLock::new(None),
            injected: Mutex::new(VecDeque::new()),
        }
    }

    /// Makes every call fail as unreachable, or restores service with `None`.
    pub fn set_unreachable(&self, reason: Option<&str>) {
        *self.unreachable.write() = reason.map(str::to_string);
    }

    /// Queues an error returned by the next call.
    pub fn push_failure(&self, error: BackendError) {
        self.injected.lock().push_back(error);
    }

    /// Returns the number of records holding versions, including deleted
    /// ones. Tombstones are not counted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().values().filter(|r| !r.is_tombstone()).count()
    }

    /// Returns true if no record holds a version.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_reachable(&self) -> BackendResult<()> {
        if let Some(error) = self.injected.lock().pop_front() {
            return Err(error);
        }
        match self.unreachable.read().as_ref() {
            Some(reason) => Err(BackendError::Unreachable {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn with_record<T>(
        &self,
        key: &SecretKey,
        f: impl FnOnce(&mut SecretRecord) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut records = self.records.write();
        let record = records
            .get_mut(key)
            .ok_or_else(|| BackendError::not_found(key))?;
        f(record)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MasterKey::generate())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("records", &self.len())
            .finish_non_exhaustive()
    }
}

impl SecretBackend for MemoryBackend {
    fn get<'a>(
        &'a self,
        key: &'a SecretKey,
        version: Option<Version>,
    ) -> BackendFuture<'a, SecretValue> {
        Box::pin(async move {
            self.check_reachable()?;
            let records = self.records.read();
            let record = records.get(key).ok_or_else(|| BackendError::not_found(key))?;
            self.master.open(key, record.sealed(version)?)
        })
    }

    fn set<'a>(&'a self, key: &'a SecretKey, request: WriteRequest) -> BackendFuture<'a, Version> {
        Box::pin(async move {
            self.check_reachable()?;
            let sealed = self.master.seal(key, &request.value)?;
            let mut records = self.records.write();
            let record = records.entry(key.clone()).or_insert_with(|| {
                SecretRecord::new(key.clone(), request.at, request.default_frequency_secs)
            });
            let version = record.apply_write(sealed, &request)?;
            debug!(version = %version, staged = !request.activate, "memory backend wrote version");
            Ok(version)
        })
    }

    fn activate<'a>(
        &'a self,
        key: &'a SecretKey,
        version: Version,
        at: DateTime<Utc>,
    ) -> BackendFuture<'a, SecretMetadata> {
        Box::pin(async move {
            self.check_reachable()?;
            self.with_record(key, |record| record.promote(version, at))
        })
    }

    fn discard<'a>(&'a self, key: &'a SecretKey, version: Version) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.check_reachable()?;
            self.with_record(key, |record| record.discard(version))
        })
    }

    fn delete<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.check_reachable()?;
            self.with_record(key, |record| record.soft_delete(Utc::now()))
        })
    }

    fn list(&self) -> BackendFuture<'_, Vec<SecretKey>> {
        Box::pin(async move {
            self.check_reachable()?;
            let mut keys: Vec<SecretKey> = self
                .records
                .read()
                .values()
                .filter(|r| r.is_live())
                .map(|r| r.key().clone())
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    fn get_metadata<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, SecretMetadata> {
        Box::pin(async move {
            self.check_reachable()?;
            self.records
                .read()
                .get(key)
                .and_then(SecretRecord::metadata)
                .ok_or_else(|| BackendError::not_found(key))
        })
    }

    fn history<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, Vec<VersionInfo>> {
        Box::pin(async move {
            self.check_reachable()?;
            self.records
                .read()
                .get(key)
                .filter(|r| r.is_live())
                .map(SecretRecord::history)
                .ok_or_else(|| BackendError::not_found(key))
        })
    }

    fn purge_deleted(&self, now: DateTime<Utc>) -> BackendFuture<'_, usize> {
        Box::pin(async move {
            self.check_reachable()?;
            let mut purged = 0;
            for record in self.records.write().values_mut() {
                if record.is_purgeable(now, self.retention) {
                    record.purge(now);
                    purged += 1;
                }
            }
            Ok(purged)
        })
    }
}
