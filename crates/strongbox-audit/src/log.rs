//! Audit log backends.
//!
//! This module provides the [`AuditLog`] trait and its implementations. An
//! `append` that returns `Ok` means the entry is durably recorded; callers
//! must not report success for an operation whose entry failed to append.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::entry::AuditEntry;
use crate::error::{AuditError, Result};
use crate::filter::AuditFilter;

/// Trait for audit logging backends.
///
/// Implementations must serialize appends so that entries are recorded in
/// the order their `append` calls complete.
pub trait AuditLog: Send + Sync {
    /// Appends an entry. Returns only once the entry is durable.
    fn append(&self, entry: &AuditEntry) -> Result<()>;

    /// Returns matching entries, oldest first.
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;
}

impl<T: AuditLog + ?Sized> AuditLog for Arc<T> {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        (**self).append(entry)
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        (**self).query(filter)
    }
}

/// Mirrors an appended entry into the `tracing` stream.
fn trace_entry(entry: &AuditEntry) {
    let key = entry.key_hash.as_ref().map_or("-", |h| h.as_str());
    if entry.result.is_alert() {
        tracing::warn!(
            target: "strongbox_audit",
            id = %entry.id,
            principal = %entry.principal,
            key_hash = %key,
            action = %entry.action,
            result = %entry.result,
            reason = entry.reason.as_deref().unwrap_or(""),
            "[AUDIT] {} {}", entry.action, entry.result
        );
    } else {
        tracing::info!(
            target: "strongbox_audit",
            id = %entry.id,
            principal = %entry.principal,
            key_hash = %key,
            action = %entry.action,
            result = %entry.result,
            "[AUDIT] {} {}", entry.action, entry.result
        );
    }
}

/// An in-memory audit log.
///
/// Entries live only as long as the process. Useful for tests and for
/// embedding where an outer system persists the trail.
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    unavailable: RwLock<Option<String>>,
}

impl MemoryAuditLog {
    /// Creates a new empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            unavailable: RwLock::new(None),
        }
    }

    /// Makes subsequent appends fail with the given reason, or restores
    /// normal operation with `None`.
    ///
    /// This is primarily useful for exercising fail-closed behaviour.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.write() = reason.map(str::to_string);
    }

    /// Returns all entries in append order.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    /// Returns the total number of audit entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the audit log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        if let Some(reason) = self.unavailable.read().as_ref() {
            return Err(AuditError::Unavailable(reason.clone()));
        }
        self.entries.write().push(entry.clone());
        trace_entry(entry);
        Ok(())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        Ok(filter.apply(self.entries.read().iter()))
    }
}

impl std::fmt::Debug for MemoryAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAuditLog")
            .field("entries_count", &self.len())
            .finish()
    }
}

/// A durable, append-only audit log stored as JSON lines.
///
/// Each append writes one line and syncs the file data to disk before
/// returning. The file is opened in append mode and never rewritten.
pub struct FileAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditLog {
    /// Opens (or creates) the audit file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent directory cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "opened audit log");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the path of the audit file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditLog for FileAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = entry.to_json()?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes()).map_err(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "audit write failed");
            AuditError::Io(e)
        })?;
        file.sync_data().map_err(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "audit sync failed");
            AuditError::Io(e)
        })?;
        drop(file);

        trace_entry(entry);
        Ok(())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        // Hold the writer lock so a concurrent append cannot leave a torn line.
        let _guard = self.file.lock();
        let reader = BufReader::new(File::open(&self.path)?);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str::<AuditEntry>(&line)?);
        }

        Ok(filter.apply(entries.iter()))
    }
}

impl std::fmt::Debug for FileAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditAction, AuditResult};
    use crate::hasher::KeyHasher;

    fn make_entry(principal: &str, action: AuditAction, result: AuditResult) -> AuditEntry {
        AuditEntry::new(principal, action, result)
    }

    #[test]
    fn memory_log_new_is_empty() {
        let log = MemoryAuditLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn memory_log_append_and_query() {
        let log = MemoryAuditLog::new();
        log.append(&make_entry("a", AuditAction::Read, AuditResult::Granted))
            .expect("append");
        log.append(&make_entry("b", AuditAction::Read, AuditResult::Denied))
            .expect("append");

        assert_eq!(log.len(), 2);
        let denied = log
            .query(&AuditFilter::new().with_result(AuditResult::Denied))
            .expect("query");
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].principal, "b");
    }

    #[test]
    fn memory_log_unavailable_fails_append() {
        let log = MemoryAuditLog::new();
        log.set_unavailable(Some("disk full"));

        let result = log.append(&make_entry("a", AuditAction::Read, AuditResult::Granted));
        assert!(matches!(result, Err(AuditError::Unavailable(_))));
        assert!(log.is_empty());

        log.set_unavailable(None);
        log.append(&make_entry("a", AuditAction::Read, AuditResult::Granted))
            .expect("append after recovery");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn file_log_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit").join("audit.jsonl");
        let hasher = KeyHasher::from_bytes([8u8; 32]);

        {
            let log = FileAuditLog::open(&path).expect("open");
            log.append(
                &make_entry("svc", AuditAction::Rotate, AuditResult::Rotated)
                    .with_key_hash(hasher.hash("api/external"))
                    .with_version(2),
            )
            .expect("append");
            log.append(&make_entry("svc", AuditAction::List, AuditResult::Granted))
                .expect("append");
        }

        let reopened = FileAuditLog::open(&path).expect("reopen");
        let all = reopened.query(&AuditFilter::new()).expect("query");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action, AuditAction::Rotate);
        assert_eq!(all[0].version, Some(2));

        let by_key = reopened
            .query(&AuditFilter::new().for_key_hash(hasher.hash("api/external")))
            .expect("query");
        assert_eq!(by_key.len(), 1);

        let raw = std::fs::read_to_string(&path).expect("read");
        assert!(!raw.contains("api/external"));
    }

    #[test]
    fn file_log_concurrent_appends_are_not_torn() {
        use std::thread;

        let dir = tempfile::tempdir().expect("tempdir");
        let log = Arc::new(FileAuditLog::open(dir.path().join("audit.jsonl")).expect("open"));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..25 {
                        let entry = make_entry(
                            &format!("writer-{t}-{i}"),
                            AuditAction::Read,
                            AuditResult::Granted,
                        );
                        log.append(&entry).expect("append");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread should complete");
        }

        let all = log.query(&AuditFilter::new()).expect("query");
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn arc_log_delegates() {
        let log: Arc<dyn AuditLog> = Arc::new(MemoryAuditLog::new());
        log.append(&make_entry("a", AuditAction::Delete, AuditResult::Granted))
            .expect("append");
        assert_eq!(log.query(&AuditFilter::new()).expect("query").len(), 1);
    }
}
