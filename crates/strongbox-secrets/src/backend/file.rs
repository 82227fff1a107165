//! File-backed adapter: one encrypted JSON record per key.
//!
//! Records are written to a temporary file, synced, then renamed over the
//! previous record, so a reader never sees a partial write. File names are
//! the hex encoding of the key. Purging rewrites a record as a tombstone
//! that keeps only the key's version high-water mark.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BackendFuture, SecretBackend, WriteRequest};
use crate::encryption::MasterKey;
use crate::error::{BackendError, BackendResult};
use crate::record::SecretRecord;
use crate::types::{SecretKey, SecretMetadata, SecretValue, Version, VersionInfo};

const RECORD_EXTENSION: &str = "json";

/// Durable backend storing sealed records under a directory.
pub struct FileBackend {
    dir: PathBuf,
    master: MasterKey,
    retention: TimeDelta,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Opens (or creates) the record directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(
        dir: impl Into<PathBuf>,
        master: MasterKey,
        retention: TimeDelta,
    ) -> BackendResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| io_error(&e, &dir))?;
        debug!(dir = %dir.display(), "opened file backend");
        Ok(Self {
            dir,
            master,
            retention,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the record directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &SecretKey) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", hex::encode(key.as_str())))
    }

    async fn load(&self, key: &SecretKey) -> BackendResult<Option<SecretRecord>> {
        let path = self.record_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| BackendError::storage(format!("corrupt record: {e}"))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&e, &path)),
        }
    }

    async fn load_existing(&self, key: &SecretKey) -> BackendResult<SecretRecord> {
        self.load(key)
            .await?
            .ok_or_else(|| BackendError::not_found(key))
    }

    async fn save(&self, record: &SecretRecord) -> BackendResult<()> {
        let path = self.record_path(record.key());
        let tmp = path.with_extension("tmp");
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| BackendError::storage(format!("failed to encode record: {e}")))?;

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| io_error(&e, &tmp))?;
        file.write_all(&body).await.map_err(|e| io_error(&e, &tmp))?;
        file.sync_all().await.map_err(|e| io_error(&e, &tmp))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&e, &path))
    }

    async fn update<T>(
        &self,
        key: &SecretKey,
        f: impl FnOnce(&mut SecretRecord) -> BackendResult<T> + Send,
    ) -> BackendResult<T> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_existing(key).await?;
        let out = f(&mut record)?;
        self.save(&record).await?;
        Ok(out)
    }

    async fn all_records(&self) -> BackendResult<Vec<SecretRecord>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&e, &self.dir))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&e, &self.dir))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(key) = key_from_path(&path) else {
                warn!(path = %path.display(), "skipping unrecognised file in backend directory");
                continue;
            };
            if let Some(record) = self.load(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn key_from_path(path: &Path) -> Option<SecretKey> {
    let stem = path.file_stem()?.to_str()?;
    let raw = hex::decode(stem).ok()?;
    SecretKey::new(String::from_utf8(raw).ok()?).ok()
}

fn io_error(err: &io::Error, path: &Path) -> BackendError {
    let reason = format!("{}: {err}", path.display());
    match err.kind() {
        io::ErrorKind::NotFound => BackendError::NotFound { what: reason },
        io::ErrorKind::PermissionDenied => BackendError::PermissionDenied { reason },
        _ => BackendError::Unreachable { reason },
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("dir", &self.dir)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl SecretBackend for FileBackend {
    fn get<'a>(
        &'a self,
        key: &'a SecretKey,
        version: Option<Version>,
    ) -> BackendFuture<'a, SecretValue> {
        Box::pin(async move {
            let record = self.load_existing(key).await?;
            self.master.open(key, record.sealed(version)?)
        })
    }

    fn set<'a>(&'a self, key: &'a SecretKey, request: WriteRequest) -> BackendFuture<'a, Version> {
        Box::pin(async move {
            let sealed = self.master.seal(key, &request.value)?;
            let _guard = self.write_lock.lock().await;
            let mut record = self.load(key).await?.unwrap_or_else(|| {
                SecretRecord::new(key.clone(), request.at, request.default_frequency_secs)
            });
            let version = record.apply_write(sealed, &request)?;
            self.save(&record).await?;
            debug!(version = %version, staged = !request.activate, "file backend wrote version");
            Ok(version)
        })
    }

    fn activate<'a>(
        &'a self,
        key: &'a SecretKey,
        version: Version,
        at: DateTime<Utc>,
    ) -> BackendFuture<'a, SecretMetadata> {
        Box::pin(self.update(key, move |record| record.promote(version, at)))
    }

    fn discard<'a>(&'a self, key: &'a SecretKey, version: Version) -> BackendFuture<'a, ()> {
        Box::pin(self.update(key, move |record| record.discard(version)))
    }

    fn delete<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, ()> {
        Box::pin(self.update(key, |record| record.soft_delete(Utc::now())))
    }

    fn list(&self) -> BackendFuture<'_, Vec<SecretKey>> {
        Box::pin(async move {
            let mut keys: Vec<SecretKey> = self
                .all_records()
                .await?
                .into_iter()
                .filter(SecretRecord::is_live)
                .map(|r| r.key().clone())
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    fn get_metadata<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, SecretMetadata> {
        Box::pin(async move {
            self.load(key)
                .await?
                .and_then(|r| r.metadata())
                .ok_or_else(|| BackendError::not_found(key))
        })
    }

    fn history<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, Vec<VersionInfo>> {
        Box::pin(async move {
            self.load(key)
                .await?
                .filter(SecretRecord::is_live)
                .map(|r| r.history())
                .ok_or_else(|| BackendError::not_found(key))
        })
    }

    fn purge_deleted(&self, now: DateTime<Utc>) -> BackendFuture<'_, usize> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut purged = 0;
            for mut record in self.all_records().await? {
                if record.is_purgeable(now, self.retention) {
                    record.purge(now);
                    self.save(&record).await?;
                    purged += 1;
                }
            }
            if purged > 0 {
                debug!(purged, dir = %self.dir.display(), "purged deleted records");
            }
            Ok(purged)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> SecretKey {
        SecretKey::new(name).expect("valid key")
    }

    fn open(dir: &Path, master: &MasterKey) -> FileBackend {
        FileBackend::open(dir, master.clone(), TimeDelta::zero()).expect("open")
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let master = MasterKey::generate();
        let k = key("db/prod/primary");

        {
            let backend = open(dir.path(), &master);
            backend
                .set(&k, WriteRequest::new(SecretValue::from("s3cret"), Utc::now()))
                .await
                .expect("set");
        }

        let backend = open(dir.path(), &master);
        assert_eq!(
            backend.get(&k, None).await.expect("get"),
            SecretValue::from("s3cret")
        );
        assert_eq!(backend.list().await.expect("list"), vec![k]);
    }

    #[tokio::test]
    async fn files_never_hold_plaintext() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = open(dir.path(), &MasterKey::generate());
        backend
            .set(
                &key("api/external"),
                WriteRequest::new(SecretValue::from("sk_plaintext_marker"), Utc::now()),
            )
            .await
            .expect("set");

        for entry in std::fs::read_dir(dir.path()).expect("read dir") {
            let body = std::fs::read_to_string(entry.expect("entry").path()).expect("read");
            assert!(!body.contains("sk_plaintext_marker"));
        }
    }

    #[tokio::test]
    async fn wrong_master_key_is_storage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let k = key("app/x");
        open(dir.path(), &MasterKey::generate())
            .set(&k, WriteRequest::new(SecretValue::from("v"), Utc::now()))
            .await
            .expect("set");

        let other = open(dir.path(), &MasterKey::generate());
        assert!(matches!(
            other.get(&k, None).await,
            Err(BackendError::Storage { .. })
        ));
    }

    #[tokio::test]
    async fn rotation_staging_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = open(dir.path(), &MasterKey::generate());
        let k = key("api/x");
        backend
            .set(&k, WriteRequest::new(SecretValue::from("v1"), Utc::now()))
            .await
            .expect("set");

        let staged = backend
            .set(&k, WriteRequest::staged(SecretValue::from("v2"), Utc::now()))
            .await
            .expect("stage");
        backend.discard(&k, staged).await.expect("discard");
        assert_eq!(
            backend.get(&k, None).await.expect("get"),
            SecretValue::from("v1")
        );

        let next = backend
            .set(&k, WriteRequest::staged(SecretValue::from("v3"), Utc::now()))
            .await
            .expect("stage");
        assert_eq!(next, Version::new(3));
        backend.activate(&k, next, Utc::now()).await.expect("activate");
        assert_eq!(
            backend.get(&k, None).await.expect("get"),
            SecretValue::from("v3")
        );
    }

    #[tokio::test]
    async fn delete_and_purge() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = open(dir.path(), &MasterKey::generate());
        let k = key("tmp/token");
        backend
            .set(&k, WriteRequest::new(SecretValue::from("v"), Utc::now()))
            .await
            .expect("set");

        backend.delete(&k).await.expect("delete");
        assert!(matches!(
            backend.get(&k, None).await,
            Err(BackendError::NotFound { .. })
        ));
        assert!(backend.list().await.expect("list").is_empty());
        assert_eq!(backend.purge_deleted(Utc::now()).await.expect("purge"), 1);
        assert_eq!(backend.purge_deleted(Utc::now()).await.expect("purge"), 0);

        let path = backend.record_path(&k);
        let body = std::fs::read_to_string(&path).expect("tombstone");
        let record: SecretRecord = serde_json::from_str(&body).expect("parse");
        assert!(record.is_tombstone());
    }

    #[tokio::test]
    async fn purged_key_continues_version_sequence_after_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let master = MasterKey::generate();
        let k = key("db/prod");
        {
            let backend = open(dir.path(), &master);
            for value in ["one", "two"] {
                backend
                    .set(&k, WriteRequest::new(SecretValue::from(value), Utc::now()))
                    .await
                    .expect("set");
            }
            backend.delete(&k).await.expect("delete");
            backend.purge_deleted(Utc::now()).await.expect("purge");
        }

        let backend = open(dir.path(), &master);
        let version = backend
            .set(&k, WriteRequest::new(SecretValue::from("three"), Utc::now()))
            .await
            .expect("set");
        assert_eq!(version, Version::new(3));
        assert_eq!(
            backend.get(&k, None).await.expect("get"),
            SecretValue::from("three")
        );
    }

    #[test]
    fn key_path_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = open(dir.path(), &MasterKey::generate());
        let k = key("a/b.c_d-e");
        assert_eq!(key_from_path(&backend.record_path(&k)), Some(k));
    }
}
