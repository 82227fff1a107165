//! Per-key version bookkeeping shared by backend adapters.
//!
//! A [`SecretRecord`] holds every version ever written for one key together
//! with the key's metadata. It owns the version invariants:
//!
//! - version numbers are strictly increasing and never reused, including
//!   across soft delete, purge and revival
//! - a live record has exactly one `active` version
//! - `staged` and `failed` versions are never served to readers
//! - `next_rotation >= last_rotated`
//!
//! Values are stored sealed; the record never sees plaintext.
//!
//! Purging a record drops its versions and metadata but keeps a tombstone
//! holding the highest version ever allocated, so a key written again after
//! purge continues the sequence.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::WriteRequest;
use crate::error::{BackendError, BackendResult};
use crate::types::{
    Classification, SecretKey, SecretMetadata, Version, VersionInfo, VersionStatus,
    frequency_delta,
};

/// One stored version.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredVersion {
    /// Version number.
    pub version: Version,
    /// Lifecycle state.
    pub status: VersionStatus,
    /// When it was written.
    pub created_at: DateTime<Utc>,
    /// Sealed value.
    #[serde(with = "sealed_base64")]
    pub sealed: Vec<u8>,
}

impl std::fmt::Debug for StoredVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredVersion")
            .field("version", &self.version)
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// All stored state for one secret key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    key: SecretKey,
    classification: Classification,
    rotation_frequency_secs: u64,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_rotated: Option<DateTime<Utc>>,
    next_rotation: Option<DateTime<Utc>>,
    active: Option<Version>,
    versions: Vec<StoredVersion>,
    deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    high_water: Option<Version>,
}

impl SecretRecord {
    /// Creates an empty record for a key that has never been written.
    #[must_use]
    pub fn new(key: SecretKey, at: DateTime<Utc>, rotation_frequency_secs: u64) -> Self {
        Self {
            key,
            classification: Classification::default(),
            rotation_frequency_secs,
            tags: BTreeMap::new(),
            created_at: at,
            updated_at: at,
            last_rotated: None,
            next_rotation: None,
            active: None,
            versions: Vec::new(),
            deleted_at: None,
            high_water: None,
        }
    }

    /// Returns the key.
    #[must_use]
    pub const fn key(&self) -> &SecretKey {
        &self.key
    }

    /// Returns true if readers can see this key.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.active.is_some() && self.deleted_at.is_none()
    }

    /// Returns the active version of a live record.
    #[must_use]
    pub fn live_version(&self) -> Option<Version> {
        self.active.filter(|_| self.deleted_at.is_none())
    }

    /// Returns the highest version ever allocated, surviving purge.
    #[must_use]
    pub fn latest_version(&self) -> Option<Version> {
        self.versions.last().map(|v| v.version).max(self.high_water)
    }

    /// Returns true if the record was purged and only remembers its
    /// version sequence.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.versions.is_empty() && self.high_water.is_some()
    }

    /// Returns when the record was soft-deleted.
    #[must_use]
    pub const fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Returns the metadata of a live record.
    #[must_use]
    pub fn metadata(&self) -> Option<SecretMetadata> {
        let version = self.live_version()?;
        let last_rotated = self.last_rotated?;
        Some(SecretMetadata {
            key: self.key.clone(),
            version,
            classification: self.classification,
            rotation_frequency_secs: self.rotation_frequency_secs,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_rotated,
            next_rotation: self.next_rotation.unwrap_or(last_rotated),
            tags: self.tags.clone(),
        })
    }

    /// Returns the version history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<VersionInfo> {
        self.versions
            .iter()
            .map(|v| VersionInfo {
                version: v.version,
                status: v.status,
                created_at: v.created_at,
            })
            .collect()
    }

    /// Applies a write of an already sealed value and returns its version.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if `expected_version` does not match the live version.
    pub fn apply_write(&mut self, sealed: Vec<u8>, request: &WriteRequest) -> BackendResult<Version> {
        if let Some(expected) = request.expected_version {
            let current = self.live_version();
            if current != Some(expected) {
                return Err(BackendError::Conflict {
                    reason: format!(
                        "expected version {expected}, found {}",
                        current.map_or_else(|| "none".to_string(), |v| v.to_string())
                    ),
                });
            }
        }

        if self.is_tombstone() {
            // Revival of a purged key: metadata starts fresh.
            self.created_at = request.at;
            self.rotation_frequency_secs = request.default_frequency_secs;
        }

        if let Some(attributes) = &request.attributes {
            if let Some(classification) = attributes.classification {
                self.classification = classification;
            }
            if let Some(frequency) = attributes.rotation_frequency_secs {
                self.rotation_frequency_secs = frequency;
            }
            if let Some(tags) = &attributes.tags {
                self.tags.clone_from(tags);
            }
        }

        let version = self.latest_version().map_or(Version::FIRST, Version::next);
        self.versions.push(StoredVersion {
            version,
            status: VersionStatus::Staged,
            created_at: request.at,
            sealed,
        });
        self.updated_at = request.at;

        if request.activate {
            self.promote(version, request.at)?;
        }
        Ok(version)
    }

    /// Makes a staged version active, superseding the previous one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown version and `Conflict` for a failed one.
    pub fn promote(&mut self, version: Version, at: DateTime<Utc>) -> BackendResult<SecretMetadata> {
        let previous = self.active;
        let frequency = frequency_delta(self.rotation_frequency_secs);

        let entry = self.find_mut(version)?;
        if entry.status == VersionStatus::Failed {
            return Err(BackendError::Conflict {
                reason: format!("version {version} failed validation and cannot be activated"),
            });
        }
        entry.status = VersionStatus::Active;

        if let Some(prev) = previous.filter(|p| *p != version) {
            if let Ok(old) = self.find_mut(prev) {
                old.status = VersionStatus::Superseded;
            }
        }

        self.active = Some(version);
        self.deleted_at = None;
        self.updated_at = at;
        self.last_rotated = Some(at);
        self.next_rotation = Some(at.checked_add_signed(frequency).unwrap_or(DateTime::<Utc>::MAX_UTC));

        self.metadata()
            .ok_or_else(|| BackendError::storage("record not live after activation"))
    }

    /// Marks a staged version as failed. The active version is untouched.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown version and `Conflict` if the version
    /// is or was active.
    pub fn discard(&mut self, version: Version) -> BackendResult<()> {
        let entry = self.find_mut(version)?;
        match entry.status {
            VersionStatus::Staged | VersionStatus::Failed => {
                entry.status = VersionStatus::Failed;
                Ok(())
            }
            status => Err(BackendError::Conflict {
                reason: format!("version {version} is {status} and cannot be discarded"),
            }),
        }
    }

    /// Soft-deletes a live record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record is not live.
    pub fn soft_delete(&mut self, at: DateTime<Utc>) -> BackendResult<()> {
        if !self.is_live() {
            return Err(BackendError::not_found(&self.key));
        }
        self.deleted_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// Returns the sealed bytes of the active or a specific readable version.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record is not live or the version is absent
    /// or unreadable.
    pub fn sealed(&self, version: Option<Version>) -> BackendResult<&[u8]> {
        let Some(active) = self.live_version() else {
            return Err(BackendError::not_found(&self.key));
        };
        let wanted = version.unwrap_or(active);
        self.versions
            .iter()
            .find(|v| v.version == wanted && v.status.is_readable())
            .map(|v| v.sealed.as_slice())
            .ok_or_else(|| BackendError::not_found(format!("{} version {wanted}", self.key)))
    }

    /// Returns true if the record should be reduced to a tombstone: it was
    /// soft-deleted at least `retention` ago, or it never held a value and
    /// every version it allocated failed validation.
    #[must_use]
    pub fn is_purgeable(&self, now: DateTime<Utc>, retention: TimeDelta) -> bool {
        if self.is_tombstone() {
            return false;
        }
        let expired = self
            .deleted_at
            .is_some_and(|deleted| deleted.checked_add_signed(retention).is_some_and(|t| now >= t));
        expired || self.is_abandoned()
    }

    /// Drops every version and all metadata, keeping the version high-water
    /// mark.
    pub fn purge(&mut self, at: DateTime<Utc>) {
        self.high_water = self.latest_version();
        self.versions.clear();
        self.active = None;
        self.classification = Classification::default();
        self.tags.clear();
        self.last_rotated = None;
        self.next_rotation = None;
        self.deleted_at.get_or_insert(at);
        self.updated_at = at;
    }

    fn is_abandoned(&self) -> bool {
        self.active.is_none()
            && !self.versions.is_empty()
            && self.versions.iter().all(|v| v.status == VersionStatus::Failed)
    }

    fn find_mut(&mut self, version: Version) -> BackendResult<&mut StoredVersion> {
        let key = &self.key;
        self.versions
            .iter_mut()
            .find(|v| v.version == version)
            .ok_or_else(|| BackendError::not_found(format!("{key} version {version}")))
    }
}

mod sealed_base64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SecretAttributes, SecretValue};
    use proptest::prelude::*;

    fn key() -> SecretKey {
        SecretKey::new("db/prod").expect("valid key")
    }

    fn write(record: &mut SecretRecord, payload: &[u8], activate: bool) -> BackendResult<Version> {
        let mut request = WriteRequest::new(SecretValue::new(payload.to_vec()), Utc::now());
        request.activate = activate;
        record.apply_write(payload.to_vec(), &request)
    }

    fn fresh() -> SecretRecord {
        SecretRecord::new(key(), Utc::now(), 3600)
    }

    #[test]
    fn first_write_is_version_one_and_active() {
        let mut record = fresh();
        assert!(!record.is_live());
        assert_eq!(write(&mut record, b"a", true).expect("write"), Version::FIRST);
        assert!(record.is_live());
        assert_eq!(record.sealed(None).expect("read"), b"a");

        let meta = record.metadata().expect("metadata");
        assert_eq!(meta.version, Version::FIRST);
        assert!(meta.next_rotation >= meta.last_rotated);
    }

    #[test]
    fn activation_supersedes_previous() {
        let mut record = fresh();
        write(&mut record, b"a", true).expect("write");
        write(&mut record, b"b", true).expect("write");

        let statuses: Vec<_> = record.history().iter().map(|v| v.status).collect();
        assert_eq!(statuses, vec![VersionStatus::Superseded, VersionStatus::Active]);
        assert_eq!(record.sealed(None).expect("read"), b"b");
        assert_eq!(record.sealed(Some(Version::FIRST)).expect("read old"), b"a");
    }

    #[test]
    fn staged_version_is_invisible_until_promoted() {
        let mut record = fresh();
        write(&mut record, b"a", true).expect("write");
        let staged = write(&mut record, b"b", false).expect("stage");

        assert_eq!(record.sealed(None).expect("read"), b"a");
        assert!(record.sealed(Some(staged)).is_err());
        assert_eq!(record.live_version(), Some(Version::FIRST));

        record.promote(staged, Utc::now()).expect("promote");
        assert_eq!(record.sealed(None).expect("read"), b"b");
    }

    #[test]
    fn discarded_version_keeps_previous_active() {
        let mut record = fresh();
        write(&mut record, b"a", true).expect("write");
        let before = record.metadata().expect("metadata");
        let staged = write(&mut record, b"b", false).expect("stage");

        record.discard(staged).expect("discard");
        assert_eq!(record.sealed(None).expect("read"), b"a");
        assert!(record.promote(staged, Utc::now()).is_err());
        assert_eq!(record.metadata().expect("metadata").next_rotation, before.next_rotation);

        // The failed number is never handed out again.
        assert_eq!(write(&mut record, b"c", true).expect("write"), Version::new(3));
    }

    #[test]
    fn discard_refuses_active_version() {
        let mut record = fresh();
        let v = write(&mut record, b"a", true).expect("write");
        assert!(matches!(record.discard(v), Err(BackendError::Conflict { .. })));
    }

    #[test]
    fn staged_write_on_new_key_stays_absent() {
        let mut record = fresh();
        let staged = write(&mut record, b"a", false).expect("stage");
        assert!(!record.is_live());
        record.discard(staged).expect("discard");
        assert!(record.metadata().is_none());
        assert!(matches!(record.sealed(None), Err(BackendError::NotFound { .. })));
    }

    #[test]
    fn expected_version_conflict() {
        let mut record = fresh();
        write(&mut record, b"a", true).expect("write");

        let mut request = WriteRequest::new(SecretValue::from("b"), Utc::now());
        request.expected_version = Some(Version::new(5));
        assert!(matches!(
            record.apply_write(b"b".to_vec(), &request),
            Err(BackendError::Conflict { .. })
        ));

        request.expected_version = Some(Version::FIRST);
        assert_eq!(
            record.apply_write(b"b".to_vec(), &request).expect("write"),
            Version::new(2)
        );
    }

    #[test]
    fn soft_delete_and_revive() {
        let mut record = fresh();
        write(&mut record, b"a", true).expect("write");
        record.soft_delete(Utc::now()).expect("delete");

        assert!(!record.is_live());
        assert!(record.sealed(None).is_err());
        assert!(record.soft_delete(Utc::now()).is_err());

        assert_eq!(write(&mut record, b"b", true).expect("revive"), Version::new(2));
        assert!(record.is_live());
        assert_eq!(record.sealed(None).expect("read"), b"b");
    }

    #[test]
    fn purge_after_retention() {
        let mut record = fresh();
        write(&mut record, b"a", true).expect("write");
        let deleted = Utc::now();
        record.soft_delete(deleted).expect("delete");

        let retention = TimeDelta::hours(1);
        assert!(!record.is_purgeable(deleted, retention));
        assert!(record.is_purgeable(deleted + TimeDelta::hours(2), retention));
    }

    #[test]
    fn purge_keeps_version_sequence() {
        let mut record = fresh();
        write(&mut record, b"a", true).expect("write");
        write(&mut record, b"b", true).expect("write");
        let deleted = Utc::now();
        record.soft_delete(deleted).expect("delete");
        record.purge(deleted);

        assert!(record.is_tombstone());
        assert!(record.history().is_empty());
        assert!(record.metadata().is_none());
        assert!(!record.is_purgeable(deleted + TimeDelta::days(1), TimeDelta::zero()));

        let json = serde_json::to_string(&record).expect("serialize");
        let mut back: SecretRecord = serde_json::from_str(&json).expect("parse");
        assert_eq!(write(&mut back, b"c", true).expect("revive"), Version::new(3));
        assert!(!back.is_tombstone());
        assert_eq!(back.history().len(), 1);
    }

    #[test]
    fn failed_only_record_is_purgeable() {
        let mut record = fresh();
        let staged = write(&mut record, b"a", false).expect("stage");
        let now = Utc::now();
        assert!(!record.is_purgeable(now, TimeDelta::days(7)), "in-flight candidate");

        record.discard(staged).expect("discard");
        assert!(record.is_purgeable(now, TimeDelta::days(7)));
        record.purge(now);
        assert_eq!(write(&mut record, b"b", true).expect("write"), Version::new(2));
    }

    #[test]
    fn attributes_merge_on_write() {
        let mut record = fresh();
        let request = WriteRequest::new(SecretValue::from("a"), Utc::now()).with_attributes(
            SecretAttributes::new()
                .with_classification(Classification::ApiKey)
                .with_tag("team", "payments"),
        );
        record.apply_write(b"a".to_vec(), &request).expect("write");

        // A write without attributes keeps them.
        write(&mut record, b"b", true).expect("write");
        let meta = record.metadata().expect("metadata");
        assert_eq!(meta.classification, Classification::ApiKey);
        assert_eq!(meta.tags.get("team").map(String::as_str), Some("payments"));
        assert_eq!(meta.rotation_frequency_secs, 3600);
    }

    #[test]
    fn serde_roundtrip_preserves_history() {
        let mut record = fresh();
        write(&mut record, b"a", true).expect("write");
        let staged = write(&mut record, b"b", false).expect("stage");
        record.discard(staged).expect("discard");

        let json = serde_json::to_string(&record).expect("serialize");
        assert!(!json.contains("\"a\""));
        let back: SecretRecord = serde_json::from_str(&json).expect("parse");
        assert_eq!(back.history(), record.history());
        assert_eq!(back.sealed(None).expect("read"), b"a");
    }

    proptest! {
        #[test]
        fn versions_strictly_increase(ops in proptest::collection::vec(0u8..4, 1..40)) {
            let mut record = fresh();
            let mut last: Option<Version> = None;
            for op in ops {
                match op {
                    0 | 1 => {
                        let v = write(&mut record, b"x", op == 0).expect("write");
                        if let Some(prev) = last {
                            prop_assert!(v > prev);
                        }
                        last = Some(v);
                    }
                    2 => {
                        if let Some(v) = last {
                            let _ = record.discard(v);
                        }
                        if record.is_purgeable(Utc::now(), TimeDelta::zero()) {
                            record.purge(Utc::now());
                        }
                    }
                    _ => {
                        let _ = record.soft_delete(Utc::now());
                    }
                }
                let active = record
                    .history()
                    .iter()
                    .filter(|v| v.status == VersionStatus::Active)
                    .count();
                prop_assert!(active <= 1);
                if let Some(meta) = record.metadata() {
                    prop_assert_eq!(active, 1);
                    prop_assert!(meta.next_rotation >= meta.last_rotated);
                }
            }
        }
    }
}
