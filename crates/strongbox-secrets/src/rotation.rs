//! Validated secret rotation.
//!
//! A rotation walks each key through
//! `Active -> RotationPending -> RotationValidating -> Active(new)`, or
//! `RotationValidating -> RotationFailed -> Active(previous)` when the
//! candidate is rejected. The candidate is written as a staged version, so
//! readers keep receiving the previous value until validation passes.
//!
//! At most one rotation per key runs at a time. A rotate request that
//! arrives while another is in flight blocks until it finishes and then
//! reports that rotation's outcome instead of producing a second version.
//!
//! Every attempt writes exactly one audit entry (`rotated` or
//! `rotation_failed`), records metrics and notifies the configured sink.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strongbox_audit::{AuditAction, AuditContext, AuditEntry, AuditLog, AuditResult, KeyHash, KeyHasher};
use tracing::{debug, error, info, warn};

use crate::backend::WriteRequest;
use crate::error::{BackendError, Error, Result};
use crate::generator::{ClassificationGenerator, ValueGenerator};
use crate::locks::{KeyLocks, KeySlot};
use crate::metrics::Metrics;
use crate::notify::{NotificationSink, RotationEvent, RotationEventKind, TracingNotifier, deliver};
use crate::router::{RoutedBackend, Router};
use crate::types::{Classification, DEFAULT_ROTATION_FREQUENCY_SECS, SecretKey, Version};
use crate::validator::{Candidate, ClassificationValidator, ValidationFailure, Validator};

/// Principal recorded for rotations started by the scheduler.
pub const SCHEDULER_PRINCIPAL: &str = "system:scheduler";

/// Rotation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    /// Upper bound on a validator call. Expiry counts as a failed validation.
    pub validation_timeout: Duration,
    /// Rotation frequency for keys created by rotation.
    pub default_frequency_secs: u64,
    /// Whether rotating a missing key creates it.
    pub create_missing: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            validation_timeout: Duration::from_secs(30),
            default_frequency_secs: DEFAULT_ROTATION_FREQUENCY_SECS,
            create_missing: false,
        }
    }
}

/// Where a key is in its rotation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    /// Serving its active version; not due.
    Active,
    /// Due, or a rotation holds the key and is producing a candidate.
    RotationPending,
    /// A staged candidate is being validated.
    RotationValidating,
    /// The candidate was rejected and is being rolled back.
    RotationFailed,
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::RotationPending => "rotation_pending",
            Self::RotationValidating => "rotation_validating",
            Self::RotationFailed => "rotation_failed",
        };
        f.write_str(name)
    }
}

/// Result of a rotation attempt that reached a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// A new version is active.
    Rotated {
        /// The new active version.
        version: Version,
        /// The version it replaced; `None` if rotation created the key.
        previous: Option<Version>,
    },
    /// The candidate was rejected; the previous version stays active.
    Failed {
        /// The rejected candidate version.
        attempted: Option<Version>,
        /// The version still active; `None` if the key does not exist.
        active: Option<Version>,
        /// Why validation failed.
        reason: String,
    },
}

impl RotationOutcome {
    /// Returns true if a new version was committed.
    #[must_use]
    pub const fn is_rotated(&self) -> bool {
        matches!(self, Self::Rotated { .. })
    }

    /// The version active after the attempt.
    #[must_use]
    pub const fn active_version(&self) -> Option<Version> {
        match self {
            Self::Rotated { version, .. } => Some(*version),
            Self::Failed { active, .. } => *active,
        }
    }
}

/// Orchestrates rotations: generate, stage, validate, commit or roll back.
pub struct RotationManager {
    router: Arc<Router>,
    audit: Arc<dyn AuditLog>,
    hasher: Arc<KeyHasher>,
    generator: Arc<dyn ValueGenerator>,
    validator: Arc<dyn Validator>,
    notifier: Arc<dyn NotificationSink>,
    metrics: Metrics,
    locks: Arc<KeyLocks>,
    config: RotationConfig,
}

impl RotationManager {
    /// Creates a manager with the built-in generator and validator, logging
    /// notifications to `tracing`.
    #[must_use]
    pub fn new(router: Arc<Router>, audit: Arc<dyn AuditLog>, hasher: Arc<KeyHasher>) -> Self {
        Self {
            router,
            audit,
            hasher,
            generator: Arc::new(ClassificationGenerator::new()),
            validator: Arc::new(ClassificationValidator::default()),
            notifier: Arc::new(TracingNotifier),
            metrics: Metrics::new(),
            locks: Arc::new(KeyLocks::new()),
            config: RotationConfig::default(),
        }
    }

    /// Replaces the value generator.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn ValueGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Replaces the validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replaces the notification sink.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Records into `metrics` instead of a private registry.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replaces the rotation settings.
    #[must_use]
    pub fn with_config(mut self, config: RotationConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the rotation settings.
    #[must_use]
    pub const fn config(&self) -> &RotationConfig {
        &self.config
    }

    pub(crate) fn locks(&self) -> &Arc<KeyLocks> {
        &self.locks
    }

    pub(crate) fn router(&self) -> &Router {
        &self.router
    }

    /// Rotates `key` now on behalf of `principal`.
    ///
    /// Blocks while another rotation of the same key is in flight and then
    /// returns that rotation's outcome.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the candidate could not be staged or
    /// committed, `NotFound` for a missing key unless creation is enabled,
    /// and `AuditWriteFailure` if the outcome could not be recorded.
    pub async fn rotate(
        &self,
        key: &SecretKey,
        principal: &str,
        context: Option<AuditContext>,
    ) -> Result<RotationOutcome> {
        let slot = self.locks.slot(key);
        let observed = slot.generation();
        let _guard = slot.lock().await;

        if let Some(outcome) = slot.completed_since(observed) {
            let key_hash = self.hasher.hash(key.as_str());
            debug!(key_hash = %key_hash, "adopting outcome of concurrent rotation");
            let entry = outcome_entry(principal, &key_hash, &Ok(outcome.clone()), context)
                .with_reason(format!(
                    "coalesced with concurrent rotation: {}",
                    describe(&outcome)
                ));
            self.append(&entry)?;
            return Ok(outcome);
        }

        self.rotate_locked(key, principal, context, &slot).await
    }

    /// Rotates `key` if it is still due at `now`, re-checked under the lock.
    ///
    /// Returns `Ok(None)` when the key is no longer due or no longer exists.
    ///
    /// # Errors
    ///
    /// As for [`rotate`](Self::rotate).
    pub async fn rotate_if_due(
        &self,
        key: &SecretKey,
        now: DateTime<Utc>,
    ) -> Result<Option<RotationOutcome>> {
        let slot = self.locks.slot(key);
        let _guard = slot.lock().await;

        let routed = self.router.resolve(key);
        match routed.backend().get_metadata(key).await {
            Ok(meta) if meta.is_rotation_due(now) => {}
            Ok(_) | Err(BackendError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(Error::from_backend(routed.id(), err)),
        }

        self.rotate_locked(key, SCHEDULER_PRINCIPAL, None, &slot)
            .await
            .map(Some)
    }

    /// Reports where `key` is in its rotation lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an absent key that is not being rotated.
    pub async fn state(&self, key: &SecretKey) -> Result<RotationState> {
        if let Some(slot) = self.locks.existing(key) {
            let phase = slot.phase();
            if phase != RotationState::Active {
                return Ok(phase);
            }
        }

        let routed = self.router.resolve(key);
        let meta = routed
            .backend()
            .get_metadata(key)
            .await
            .map_err(|e| Error::from_backend(routed.id(), e))?;
        Ok(if meta.is_rotation_due(Utc::now()) {
            RotationState::RotationPending
        } else {
            RotationState::Active
        })
    }

    /// Returns every live key due for rotation at `now`, sorted.
    ///
    /// A backend that cannot be listed is skipped with a warning so one
    /// outage does not stall rotation elsewhere.
    pub async fn due_keys(&self, now: DateTime<Utc>) -> Vec<SecretKey> {
        let mut due = Vec::new();
        for routed in self.router.backends() {
            let keys = match routed.backend().list().await {
                Ok(keys) => keys,
                Err(err) => {
                    warn!(backend = routed.id(), error = %err, "skipping backend in due scan");
                    continue;
                }
            };
            for key in keys {
                // Keys left behind on a backend they no longer route to are not managed.
                if !self.router.routes_to(&key, routed) {
                    continue;
                }
                match routed.backend().get_metadata(&key).await {
                    Ok(meta) if meta.is_rotation_due(now) => due.push(key),
                    Ok(_) => {}
                    Err(err) => debug!(
                        backend = routed.id(),
                        key_hash = %self.hasher.hash(key.as_str()),
                        error = %err,
                        "metadata unavailable during due scan"
                    ),
                }
            }
        }
        due.sort();
        due.dedup();
        due
    }

    /// Drops lock slots that no caller holds.
    pub(crate) fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    async fn rotate_locked(
        &self,
        key: &SecretKey,
        principal: &str,
        context: Option<AuditContext>,
        slot: &KeySlot,
    ) -> Result<RotationOutcome> {
        let started = Instant::now();
        let key_hash = self.hasher.hash(key.as_str());
        slot.set_phase(RotationState::RotationPending);

        let (classification, result) = self.attempt(key, slot).await;
        slot.finish(result.as_ref().ok().cloned());

        let elapsed = started.elapsed().as_secs_f64();
        let outcome_label = match &result {
            Ok(RotationOutcome::Rotated { version, previous }) => {
                info!(
                    key_hash = %key_hash,
                    principal,
                    version = version.get(),
                    previous = previous.map(Version::get),
                    "rotation committed"
                );
                "rotated"
            }
            Ok(RotationOutcome::Failed {
                attempted, reason, ..
            }) => {
                error!(
                    key_hash = %key_hash,
                    principal,
                    attempted = attempted.map(Version::get),
                    reason = %reason,
                    "rotation rolled back"
                );
                "failed"
            }
            Err(err) => {
                error!(key_hash = %key_hash, principal, error = %err, "rotation aborted");
                "failed"
            }
        };
        self.metrics
            .record_rotation(classification.as_str(), outcome_label, elapsed);

        let entry = outcome_entry(principal, &key_hash, &result, context);
        let recorded = self.append(&entry);

        deliver(
            self.notifier.as_ref(),
            &event_for(key, key_hash, classification, &result),
        );

        recorded?;
        result
    }

    async fn attempt(&self, key: &SecretKey, slot: &KeySlot) -> (Classification, Result<RotationOutcome>) {
        let routed = self.router.resolve(key);
        let (classification, tags, previous) = match routed.backend().get_metadata(key).await {
            Ok(meta) => (meta.classification, meta.tags, Some(meta.version)),
            Err(BackendError::NotFound { .. }) if self.config.create_missing => {
                (Classification::default(), BTreeMap::new(), None)
            }
            Err(err) => {
                return (
                    Classification::default(),
                    Err(Error::from_backend(routed.id(), err)),
                );
            }
        };

        let result = self
            .stage_and_validate(routed, key, classification, &tags, previous, slot)
            .await;
        (classification, result)
    }

    async fn stage_and_validate(
        &self,
        routed: &RoutedBackend,
        key: &SecretKey,
        classification: Classification,
        tags: &BTreeMap<String, String>,
        previous: Option<Version>,
        slot: &KeySlot,
    ) -> Result<RotationOutcome> {
        let backend = routed.backend();
        let value = self.generator.generate(classification);
        let request = WriteRequest::staged(value.clone(), Utc::now())
            .with_default_frequency(self.config.default_frequency_secs);
        let staged = backend
            .set(key, request)
            .await
            .map_err(|e| Error::from_backend(routed.id(), e))?;

        slot.set_phase(RotationState::RotationValidating);
        let candidate = Candidate {
            key,
            version: staged,
            classification,
            tags,
            value: &value,
        };
        let timeout = self.config.validation_timeout;
        let verdict = tokio::time::timeout(timeout, self.validator.validate(&candidate))
            .await
            .unwrap_or_else(|_| {
                Err(ValidationFailure::new(format!(
                    "validation timed out after {}ms",
                    timeout.as_millis()
                )))
            });

        match verdict {
            Ok(()) => match backend.activate(key, staged, Utc::now()).await {
                Ok(meta) => Ok(RotationOutcome::Rotated {
                    version: meta.version,
                    previous,
                }),
                Err(err) => {
                    self.discard(routed, key, staged).await;
                    Err(Error::from_backend(routed.id(), err))
                }
            },
            Err(failure) => {
                slot.set_phase(RotationState::RotationFailed);
                self.discard(routed, key, staged).await;
                Ok(RotationOutcome::Failed {
                    attempted: Some(staged),
                    active: previous,
                    reason: failure.reason,
                })
            }
        }
    }

    async fn discard(&self, routed: &RoutedBackend, key: &SecretKey, version: Version) {
        // A candidate that cannot be marked failed stays staged, which readers never see.
        if let Err(err) = routed.backend().discard(key, version).await {
            warn!(
                backend = routed.id(),
                key_hash = %self.hasher.hash(key.as_str()),
                version = version.get(),
                error = %err,
                "failed to mark rejected candidate"
            );
        }
    }

    fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.append(entry).map_err(|err| {
            error!(error = %err, "audit write failed for rotation");
            Error::AuditWriteFailure(err)
        })
    }
}

impl fmt::Debug for RotationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationManager")
            .field("config", &self.config)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

fn describe(outcome: &RotationOutcome) -> String {
    match outcome {
        RotationOutcome::Rotated { version, .. } => format!("rotated to version {version}"),
        RotationOutcome::Failed { reason, .. } => reason.clone(),
    }
}

fn outcome_entry(
    principal: &str,
    key_hash: &KeyHash,
    result: &Result<RotationOutcome>,
    context: Option<AuditContext>,
) -> AuditEntry {
    let entry = match result {
        Ok(RotationOutcome::Rotated { version, .. }) => {
            AuditEntry::new(principal, AuditAction::Rotate, AuditResult::Rotated)
                .with_version(version.get())
        }
        Ok(RotationOutcome::Failed {
            attempted, reason, ..
        }) => {
            let entry = AuditEntry::new(principal, AuditAction::Rotate, AuditResult::RotationFailed)
                .with_reason(reason.clone());
            match attempted {
                Some(v) => entry.with_version(v.get()),
                None => entry,
            }
        }
        Err(err) => AuditEntry::new(principal, AuditAction::Rotate, AuditResult::RotationFailed)
            .with_reason(err.to_string()),
    }
    .with_key_hash(key_hash.clone());

    match context {
        Some(ctx) if !ctx.is_empty() => entry.with_context(ctx),
        _ => entry,
    }
}

fn event_for(
    key: &SecretKey,
    key_hash: KeyHash,
    classification: Classification,
    result: &Result<RotationOutcome>,
) -> RotationEvent {
    match result {
        Ok(RotationOutcome::Rotated { version, previous }) => {
            RotationEvent::new(key.as_str(), key_hash, classification, RotationEventKind::Rotated)
                .with_version(Some(*version))
                .with_previous(*previous)
        }
        Ok(RotationOutcome::Failed {
            attempted,
            active,
            reason,
        }) => RotationEvent::new(
            key.as_str(),
            key_hash,
            classification,
            RotationEventKind::RotationFailed,
        )
        .with_version(*attempted)
        .with_previous(*active)
        .with_reason(reason.clone()),
        Err(err) => RotationEvent::new(
            key.as_str(),
            key_hash,
            classification,
            RotationEventKind::RotationFailed,
        )
        .with_reason(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeDelta;
    use strongbox_audit::{AuditFilter, MemoryAuditLog};
    use tokio::sync::Semaphore;

    use super::*;
    use crate::backend::{MemoryBackend, SecretBackend};
    use crate::encryption::MasterKey;
    use crate::notify::ChannelNotifier;
    use crate::types::{SecretAttributes, SecretValue, VersionStatus};
    use crate::validator::ValidationFuture;

    struct Accept;

    impl Validator for Accept {
        fn validate<'a>(&'a self, _candidate: &'a Candidate<'a>) -> ValidationFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    struct Reject;

    impl Validator for Reject {
        fn validate<'a>(&'a self, _candidate: &'a Candidate<'a>) -> ValidationFuture<'a> {
            Box::pin(async { Err(ValidationFailure::new("endpoint refused credential")) })
        }
    }

    struct Slow;

    impl Validator for Slow {
        fn validate<'a>(&'a self, _candidate: &'a Candidate<'a>) -> ValidationFuture<'a> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
        }
    }

    /// Blocks until a permit is released and counts calls.
    struct Held {
        release: Arc<Semaphore>,
        calls: AtomicUsize,
    }

    impl Default for Held {
        fn default() -> Self {
            Self {
                release: Arc::new(Semaphore::new(0)),
                calls: AtomicUsize::default(),
            }
        }
    }

    impl Validator for Held {
        fn validate<'a>(&'a self, _candidate: &'a Candidate<'a>) -> ValidationFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let permit = self
                    .release
                    .acquire()
                    .await
                    .map_err(|_| ValidationFailure::new("closed"))?;
                permit.forget();
                Ok(())
            })
        }
    }

    struct Fixture {
        backend: Arc<MemoryBackend>,
        audit: Arc<MemoryAuditLog>,
        hasher: Arc<KeyHasher>,
        manager: Arc<RotationManager>,
    }

    fn fixture(validator: Arc<dyn Validator>, config: RotationConfig) -> Fixture {
        let backend = Arc::new(MemoryBackend::new(MasterKey::generate()));
        let audit = Arc::new(MemoryAuditLog::new());
        let hasher = Arc::new(KeyHasher::from_bytes([9u8; 32]));
        let router = Arc::new(Router::single("mem", backend.clone()));
        let manager = RotationManager::new(router, audit.clone(), hasher.clone())
            .with_validator(validator)
            .with_config(config);
        Fixture {
            backend,
            audit,
            hasher,
            manager: Arc::new(manager),
        }
    }

    fn key(name: &str) -> SecretKey {
        SecretKey::new(name).expect("key")
    }

    async fn seed(backend: &MemoryBackend, key: &SecretKey, value: &str, at: DateTime<Utc>) {
        backend
            .set(
                key,
                WriteRequest::new(SecretValue::from(value), at).with_attributes(
                    SecretAttributes::new()
                        .with_classification(Classification::ApiKey)
                        .with_rotation_days(90),
                ),
            )
            .await
            .expect("seed");
    }

    #[tokio::test]
    async fn successful_rotation_commits_new_version() {
        let f = fixture(Arc::new(Accept), RotationConfig::default());
        let k = key("api/external");
        seed(&f.backend, &k, "old", Utc::now()).await;

        let outcome = f.manager.rotate(&k, "admin", None).await.expect("rotate");
        assert_eq!(
            outcome,
            RotationOutcome::Rotated {
                version: Version::new(2),
                previous: Some(Version::FIRST),
            }
        );

        let value = f.backend.get(&k, None).await.expect("get");
        assert_ne!(value, SecretValue::from("old"));
        assert!(value.as_str().expect("utf-8").starts_with("sk_"));

        let meta = f.backend.get_metadata(&k).await.expect("meta");
        assert!(meta.next_rotation >= meta.last_rotated);
        assert_eq!(meta.next_rotation - meta.last_rotated, TimeDelta::days(90));

        let entries = f.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result, AuditResult::Rotated);
        assert_eq!(entries[0].version, Some(2));
        assert_eq!(entries[0].principal, "admin");
    }

    #[tokio::test]
    async fn rejected_candidate_rolls_back() {
        let f = fixture(Arc::new(Reject), RotationConfig::default());
        let k = key("db/prod");
        let seeded_at = Utc::now() - TimeDelta::days(100);
        seed(&f.backend, &k, "keep-me", seeded_at).await;
        let before = f.backend.get_metadata(&k).await.expect("meta");

        let outcome = f.manager.rotate(&k, "admin", None).await.expect("rotate");
        assert!(!outcome.is_rotated());
        assert_eq!(outcome.active_version(), Some(Version::FIRST));

        assert_eq!(
            f.backend.get(&k, None).await.expect("get"),
            SecretValue::from("keep-me")
        );
        let after = f.backend.get_metadata(&k).await.expect("meta");
        assert_eq!(after.version, Version::FIRST);
        assert_eq!(after.next_rotation, before.next_rotation);

        let history = f.backend.history(&k).await.expect("history");
        assert_eq!(history[1].status, VersionStatus::Failed);

        let entry = &f.audit.entries()[0];
        assert_eq!(entry.result, AuditResult::RotationFailed);
        assert_eq!(entry.reason.as_deref(), Some("endpoint refused credential"));
    }

    #[tokio::test]
    async fn validation_timeout_is_failure() {
        let config = RotationConfig {
            validation_timeout: Duration::from_millis(20),
            ..RotationConfig::default()
        };
        let f = fixture(Arc::new(Slow), config);
        let k = key("slow/key");
        seed(&f.backend, &k, "v1", Utc::now()).await;

        match f.manager.rotate(&k, "admin", None).await.expect("rotate") {
            RotationOutcome::Failed { reason, active, .. } => {
                assert!(reason.contains("timed out"));
                assert_eq!(active, Some(Version::FIRST));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(f.manager.state(&k).await.expect("state"), RotationState::Active);
    }

    #[tokio::test]
    async fn missing_key_is_not_found_and_audited() {
        let f = fixture(Arc::new(Accept), RotationConfig::default());
        let err = f
            .manager
            .rotate(&key("nope"), "admin", None)
            .await
            .expect_err("missing");
        assert!(matches!(err, Error::NotFound { .. }));

        let entries = f.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result, AuditResult::RotationFailed);
    }

    #[tokio::test]
    async fn create_missing_creates_on_success() {
        let config = RotationConfig {
            create_missing: true,
            ..RotationConfig::default()
        };
        let f = fixture(Arc::new(Accept), config);
        let k = key("fresh/key");
        let outcome = f.manager.rotate(&k, "admin", None).await.expect("rotate");
        assert_eq!(
            outcome,
            RotationOutcome::Rotated {
                version: Version::FIRST,
                previous: None,
            }
        );
        assert_eq!(
            f.backend.get_metadata(&k).await.expect("meta").classification,
            Classification::Generic
        );
    }

    #[tokio::test]
    async fn failed_create_leaves_key_absent() {
        let config = RotationConfig {
            create_missing: true,
            ..RotationConfig::default()
        };
        let f = fixture(Arc::new(Reject), config);
        let k = key("fresh/key");
        let outcome = f.manager.rotate(&k, "admin", None).await.expect("rotate");
        assert_eq!(outcome.active_version(), None);
        assert!(f.backend.get(&k, None).await.is_err());
        assert!(f.backend.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn concurrent_rotations_commit_one_version() {
        let held = Arc::new(Held::default());
        let f = fixture(held.clone(), RotationConfig::default());
        let k = key("db/prod");
        seed(&f.backend, &k, "v1", Utc::now()).await;

        let first = {
            let manager = f.manager.clone();
            let k = k.clone();
            tokio::spawn(async move { manager.rotate(&k, "alice", None).await })
        };
        while held.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            f.manager.state(&k).await.expect("state"),
            RotationState::RotationValidating
        );

        let second = {
            let manager = f.manager.clone();
            let k = k.clone();
            tokio::spawn(async move { manager.rotate(&k, "bob", None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        held.release.add_permits(1);

        let a = first.await.expect("join").expect("rotate");
        let b = second.await.expect("join").expect("rotate");
        assert_eq!(a, b);
        assert_eq!(held.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.backend.history(&k).await.expect("history").len(), 2);
        assert_eq!(
            f.backend.get_metadata(&k).await.expect("meta").version,
            Version::new(2)
        );

        let entries = f
            .audit
            .query(&AuditFilter::new().for_key_hash(f.hasher.hash(k.as_str())))
            .expect("query");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.result == AuditResult::Rotated));
    }

    #[tokio::test]
    async fn sequential_rotations_each_commit() {
        let f = fixture(Arc::new(Accept), RotationConfig::default());
        let k = key("k");
        seed(&f.backend, &k, "v1", Utc::now()).await;
        f.manager.rotate(&k, "a", None).await.expect("first");
        let second = f.manager.rotate(&k, "a", None).await.expect("second");
        assert_eq!(second.active_version(), Some(Version::new(3)));
    }

    #[tokio::test]
    async fn due_keys_and_rotate_if_due() {
        let f = fixture(Arc::new(Accept), RotationConfig::default());
        let now = Utc::now();
        seed(&f.backend, &key("b/due"), "x", now - TimeDelta::days(91)).await;
        seed(&f.backend, &key("a/due"), "x", now - TimeDelta::days(120)).await;
        seed(&f.backend, &key("c/fresh"), "x", now).await;

        assert_eq!(f.manager.due_keys(now).await, vec![key("a/due"), key("b/due")]);
        assert_eq!(
            f.manager.state(&key("a/due")).await.expect("state"),
            RotationState::RotationPending
        );

        assert!(
            f.manager
                .rotate_if_due(&key("c/fresh"), now)
                .await
                .expect("not due")
                .is_none()
        );
        let outcome = f
            .manager
            .rotate_if_due(&key("a/due"), now)
            .await
            .expect("rotate")
            .expect("was due");
        assert!(outcome.is_rotated());
        assert_eq!(f.audit.entries()[0].principal, SCHEDULER_PRINCIPAL);
        assert_eq!(f.manager.due_keys(now).await, vec![key("b/due")]);
    }

    #[tokio::test]
    async fn audit_failure_fails_rotation_call() {
        let f = fixture(Arc::new(Accept), RotationConfig::default());
        let k = key("k");
        seed(&f.backend, &k, "v1", Utc::now()).await;
        f.audit.set_unavailable(Some("disk full"));

        let err = f.manager.rotate(&k, "admin", None).await.expect_err("audit");
        assert!(matches!(err, Error::AuditWriteFailure(_)));
    }

    #[tokio::test]
    async fn notifications_follow_outcome() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let backend = Arc::new(MemoryBackend::default());
        let manager = RotationManager::new(
            Arc::new(Router::single("mem", backend.clone())),
            Arc::new(MemoryAuditLog::new()),
            Arc::new(KeyHasher::generate()),
        )
        .with_validator(Arc::new(Reject))
        .with_notifier(Arc::new(notifier));
        let k = key("api/external");
        seed(&backend, &k, "v1", Utc::now()).await;

        manager.rotate(&k, "admin", None).await.expect("rotate");
        let event = rx.try_recv().expect("event");
        assert_eq!(event.kind, RotationEventKind::RotationFailed);
        assert_eq!(event.classification, Classification::ApiKey);
        assert_eq!(event.version, Some(Version::new(2)));
        assert_eq!(event.previous_version, Some(Version::FIRST));
    }
}
