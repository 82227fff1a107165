//! End-to-end tests for the secret service.
//!
//! These tests verify:
//! 1. Set/get round trips and version numbering
//! 2. Deny-overrides-allow and default-deny through the service
//! 3. Rotation rollback keeps the previous value readable
//! 4. Concurrent rotations of one key commit a single version
//! 5. Audit completeness and key hashing
//! 6. Fail-closed behaviour when the audit log is unavailable
//! 7. The scheduled rotation scenario with an unreachable probe endpoint
//! 8. Version numbers are never reused once a key is purged

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use strongbox_audit::{AuditAction, AuditFilter, AuditResult, KeyHasher, MemoryAuditLog};
use strongbox_policy::{AccessPolicy, Action, PolicyEngine, PolicySet};
use strongbox_secrets::validator::{Candidate, ValidationFuture};
use strongbox_secrets::{
    Caller, ChannelNotifier, Classification, ClassificationValidator, EntropyValidator,
    ErrorKind, HttpProbeValidator, MasterKey, MemoryBackend, RotationConfig, RotationEventKind,
    RotationOutcome, RotationScheduler, Router, SCHEDULER_PRINCIPAL, SchedulerConfig, SecretAttributes,
    SecretBackend, SecretKey, SecretService, SecretValue, Severity, ValidationFailure, Validator,
    Version, VersionStatus, WriteRequest,
};

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    service: SecretService,
    backend: Arc<MemoryBackend>,
    audit: Arc<MemoryAuditLog>,
}

fn key(name: &str) -> SecretKey {
    SecretKey::new(name).expect("key")
}

fn admin_policies() -> Vec<AccessPolicy> {
    vec![AccessPolicy::allow("admin", "*", ["admin"], Action::all().iter().copied()).expect("policy")]
}

fn harness(policies: Vec<AccessPolicy>) -> Harness {
    harness_with(policies, |builder| builder)
}

fn harness_with(
    policies: Vec<AccessPolicy>,
    configure: impl FnOnce(strongbox_secrets::SecretServiceBuilder) -> strongbox_secrets::SecretServiceBuilder,
) -> Harness {
    let backend = Arc::new(MemoryBackend::new(MasterKey::generate()));
    let audit = Arc::new(MemoryAuditLog::new());
    let engine = PolicyEngine::new(PolicySet::new(policies).expect("policy set"));

    let builder = SecretService::builder(
        Router::single("mem", backend.clone()),
        audit.clone(),
        KeyHasher::generate(),
    )
    .policy(Arc::new(engine));

    Harness {
        service: configure(builder).build(),
        backend,
        audit,
    }
}

/// Passes after a pause, counting how many validations ran.
#[derive(Default)]
struct SlowValidator {
    calls: AtomicUsize,
}

impl Validator for SlowValidator {
    fn validate<'a>(&'a self, _candidate: &'a Candidate<'a>) -> ValidationFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        })
    }
}

/// Always rejects.
struct Rejecting;

impl Validator for Rejecting {
    fn validate<'a>(&'a self, _candidate: &'a Candidate<'a>) -> ValidationFuture<'a> {
        Box::pin(async { Err(ValidationFailure::new("login refused")) })
    }
}

// ============================================================================
// Read/Write
// ============================================================================

#[tokio::test]
async fn set_then_get_returns_value_and_next_version() {
    let h = harness(admin_policies());
    let admin = Caller::new("admin");
    let k = key("app/config");

    let mut previous = 0;
    for value in ["one", "two", "three"] {
        let version = h
            .service
            .set(&admin, &k, SecretValue::from(value), None)
            .await
            .expect("set");
        assert_eq!(version.get(), previous + 1);
        previous = version.get();

        let read = h.service.get(&admin, &k, None).await.expect("get");
        assert_eq!(read.as_str(), Some(value));
    }

    let old = h
        .service
        .get(&admin, &k, Some(Version::new(1)))
        .await
        .expect("old version");
    assert_eq!(old.as_str(), Some("one"));
}

#[tokio::test]
async fn deleted_key_is_not_found() {
    let h = harness(admin_policies());
    let admin = Caller::new("admin");
    let k = key("tmp/token");

    h.service
        .set(&admin, &k, SecretValue::from("short-lived"), None)
        .await
        .expect("set");
    h.service.delete(&admin, &k).await.expect("delete");

    let err = h.service.get(&admin, &k, None).await.expect_err("gone");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.service.list(&admin).await.expect("list").is_empty());
}

// ============================================================================
// Policy Evaluation
// ============================================================================

#[tokio::test]
async fn deny_overrides_more_specific_allow() {
    let h = harness(vec![
        AccessPolicy::deny("no-db-reads", "db/*", ["*"], [Action::Read]).expect("policy"),
        AccessPolicy::allow("svc-a-db", "db/*", ["service-a"], [Action::Read]).expect("policy"),
        AccessPolicy::allow("admin", "*", ["admin"], [Action::Write]).expect("policy"),
    ]);
    h.service
        .set(&Caller::new("admin"), &key("db/prod"), SecretValue::from("pw"), None)
        .await
        .expect("seed");

    let err = h
        .service
        .get(&Caller::new("service-a"), &key("db/prod"), None)
        .await
        .expect_err("denied");
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    let last = h.audit.entries().pop().expect("entry");
    assert_eq!(last.result, AuditResult::Denied);
    assert_eq!(last.principal, "service-a");
}

#[tokio::test]
async fn no_applicable_policy_denies() {
    let h = harness(vec![
        AccessPolicy::allow("svc-a-app", "app/*", ["service-a"], [Action::Read]).expect("policy"),
    ]);

    let err = h
        .service
        .get(&Caller::new("service-b"), &key("app/config"), None)
        .await
        .expect_err("default deny");
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

#[tokio::test]
async fn list_hides_unreadable_keys() {
    let h = harness(vec![
        AccessPolicy::allow("admin", "*", ["admin"], Action::all().iter().copied()).expect("policy"),
        AccessPolicy::allow("svc-list", "*", ["service-a"], [Action::List]).expect("policy"),
        AccessPolicy::allow("svc-read", "app/*", ["service-a"], [Action::Read]).expect("policy"),
    ]);
    let admin = Caller::new("admin");
    for name in ["app/one", "app/two", "db/prod"] {
        h.service
            .set(&admin, &key(name), SecretValue::from("v"), None)
            .await
            .expect("seed");
    }

    let visible = h.service.list(&Caller::new("service-a")).await.expect("list");
    assert_eq!(visible, vec![key("app/one"), key("app/two")]);
}

#[tokio::test]
async fn concealed_denials_still_deny_list() {
    let h = harness_with(
        vec![AccessPolicy::allow("svc-a-app", "app/*", ["service-a"], [Action::Read]).expect("policy")],
        |b| b.conceal_denials(true),
    );
    let caller = Caller::new("service-b");

    let err = h
        .service
        .get(&caller, &key("app/config"), None)
        .await
        .expect_err("denied");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h.service.list(&caller).await.expect_err("denied");
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

// ============================================================================
// Rotation
// ============================================================================

#[tokio::test]
async fn failed_rotation_keeps_previous_value() {
    let h = harness_with(admin_policies(), |b| b.validator(Arc::new(Rejecting)));
    let admin = Caller::new("admin");
    let k = key("db/prod");

    h.service
        .set(
            &admin,
            &k,
            SecretValue::from("original"),
            Some(SecretAttributes::new().with_classification(Classification::DatabasePassword)),
        )
        .await
        .expect("seed");

    let outcome = h.service.rotate_detailed(&admin, &k).await.expect("rotate");
    assert!(
        matches!(
            outcome,
            RotationOutcome::Failed {
                attempted: Some(attempted),
                active: Some(active),
                ..
            } if attempted == Version::new(2) && active == Version::new(1)
        ),
        "unexpected outcome: {outcome:?}"
    );

    let value = h.service.get(&admin, &k, None).await.expect("get");
    assert_eq!(value.as_str(), Some("original"));

    let meta = h.service.get_metadata(&admin, &k).await.expect("metadata");
    assert_eq!(meta.version, Version::new(1));

    let history = h.service.versions(&admin, &k).await.expect("versions");
    let statuses: Vec<VersionStatus> = history.iter().map(|v| v.status).collect();
    assert_eq!(statuses, vec![VersionStatus::Active, VersionStatus::Failed]);

    let err = h.service.rotate(&admin, &k).await.expect_err("validation");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn concurrent_rotations_commit_one_version() {
    let validator = Arc::new(SlowValidator::default());
    let h = harness_with(admin_policies(), |b| b.validator(validator.clone()));
    let admin = Caller::new("admin");
    let k = key("api/external");

    h.service
        .set(&admin, &k, SecretValue::from("initial-token"), None)
        .await
        .expect("seed");

    let (a, b) = tokio::join!(h.service.rotate(&admin, &k), h.service.rotate(&admin, &k));
    let a = a.expect("first rotate");
    let b = b.expect("second rotate");

    assert_eq!(a, Version::new(2));
    assert_eq!(a, b, "the queued call adopts the in-flight result");
    assert_eq!(validator.calls.load(Ordering::SeqCst), 1);

    let history = h.service.versions(&admin, &k).await.expect("versions");
    assert_eq!(history.len(), 2);

    let rotations: Vec<_> = h
        .audit
        .entries()
        .into_iter()
        .filter(|e| e.action == AuditAction::Rotate)
        .collect();
    assert_eq!(rotations.len(), 2);
    assert!(rotations.iter().all(|e| e.result == AuditResult::Rotated));
}

// ============================================================================
// Audit
// ============================================================================

#[tokio::test]
async fn every_call_writes_exactly_one_entry() {
    let h = harness(vec![
        AccessPolicy::allow("admin", "*", ["admin"], Action::all().iter().copied()).expect("policy"),
    ]);
    let admin = Caller::new("admin");
    let stranger = Caller::new("stranger");
    let k = key("db/orders-primary");

    let mut calls = 0;
    h.service
        .set(&admin, &k, SecretValue::from("pw-1"), None)
        .await
        .expect("set");
    calls += 1;
    h.service.get(&admin, &k, None).await.expect("get");
    calls += 1;
    h.service.get(&stranger, &k, None).await.expect_err("denied");
    calls += 1;
    h.service.list(&admin).await.expect("list");
    calls += 1;
    h.service.rotate(&admin, &k).await.expect("rotate");
    calls += 1;
    h.service.rotate(&stranger, &k).await.expect_err("denied");
    calls += 1;
    h.service.get_metadata(&admin, &k).await.expect("metadata");
    calls += 1;
    h.service
        .get(&admin, &key("db/missing"), None)
        .await
        .expect_err("missing");
    calls += 1;

    let entries = h.audit.entries();
    assert_eq!(entries.len(), calls);

    for entry in &entries {
        let json = entry.to_json().expect("json");
        assert!(!json.contains("orders-primary"), "raw key leaked: {json}");
        assert!(!json.contains("pw-1"), "value leaked: {json}");
    }

    let by_key = h
        .service
        .query_audit(&AuditFilter::new().for_key_hash(h.service.key_hash(&k)))
        .expect("query");
    // Everything except list and the missing-key read names this key.
    assert_eq!(by_key.len(), calls - 2);
}

#[tokio::test]
async fn unavailable_audit_log_fails_closed() {
    let h = harness(admin_policies());
    let admin = Caller::new("admin");
    let k = key("app/config");

    h.audit.set_unavailable(Some("disk full"));
    let err = h
        .service
        .set(&admin, &k, SecretValue::from("v"), None)
        .await
        .expect_err("audit down");
    assert_eq!(err.kind(), ErrorKind::AuditWriteFailure);
    assert!(h.backend.is_empty(), "backend must not be touched");

    h.audit.set_unavailable(None);
    let err = h.service.get(&admin, &k, None).await.expect_err("never written");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// Scheduled Rotation
// ============================================================================

#[tokio::test]
async fn overdue_api_key_with_unreachable_probe_rolls_back() {
    let (notifier, mut events) = ChannelNotifier::new();
    let probe = HttpProbeValidator::new(Duration::from_secs(2))
        .expect("client")
        .with_default_url("http://127.0.0.1:1/health");
    let validator = ClassificationValidator::new(Arc::new(EntropyValidator::default()))
        .with(Classification::ApiKey, Arc::new(probe));

    let h = harness_with(admin_policies(), |b| {
        b.validator(Arc::new(validator)).notifier(Arc::new(notifier))
    });
    let k = key("api/external");
    let now = Utc::now();

    h.backend
        .set(
            &k,
            WriteRequest::new(SecretValue::from("tok_live_original"), now - TimeDelta::days(91))
                .with_attributes(
                    SecretAttributes::new()
                        .with_classification(Classification::ApiKey)
                        .with_rotation_days(90),
                ),
        )
        .await
        .expect("seed");

    let scheduler = RotationScheduler::new(Arc::clone(h.service.rotation()), SchedulerConfig::default());
    let report = scheduler.tick(now).await;
    assert_eq!(report.due, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.rotated, 0);

    let admin = Caller::new("admin");
    let meta = h.service.get_metadata(&admin, &k).await.expect("metadata");
    assert_eq!(meta.version, Version::new(1));
    let value = h.service.get(&admin, &k, None).await.expect("get");
    assert_eq!(value.as_str(), Some("tok_live_original"));

    let failed = h
        .service
        .query_audit(
            &AuditFilter::new()
                .for_key_hash(h.service.key_hash(&k))
                .with_result(AuditResult::RotationFailed),
        )
        .expect("query");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].principal, SCHEDULER_PRINCIPAL);
    assert!(failed[0].reason.as_deref().is_some_and(|r| !r.is_empty()));

    let event = events.try_recv().expect("notification");
    assert_eq!(event.kind, RotationEventKind::RotationFailed);
    assert_eq!(event.severity, Severity::Alert);
    assert_eq!(event.key, "api/external");
}

// ============================================================================
// Purge
// ============================================================================

fn scheduler_for(h: &Harness) -> RotationScheduler {
    RotationScheduler::new(Arc::clone(h.service.rotation()), SchedulerConfig::default())
}

#[tokio::test]
async fn purged_key_never_reuses_versions() {
    let h = harness(admin_policies());
    let admin = Caller::new("admin");
    let k = key("db/prod");

    for value in ["one", "two"] {
        h.service
            .set(&admin, &k, SecretValue::from(value), None)
            .await
            .expect("set");
    }
    h.service.delete(&admin, &k).await.expect("delete");

    let report = scheduler_for(&h).tick(Utc::now()).await;
    assert_eq!(report.purged, 1);
    assert!(h.backend.is_empty());

    let version = h
        .service
        .set(&admin, &k, SecretValue::from("three"), None)
        .await
        .expect("set after purge");
    assert_eq!(version, Version::new(3));
    let history = h.service.versions(&admin, &k).await.expect("versions");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, version);
}

#[tokio::test]
async fn failed_create_by_rotation_is_purged() {
    let h = harness_with(admin_policies(), |b| {
        b.validator(Arc::new(Rejecting)).rotation_config(RotationConfig {
            create_missing: true,
            ..RotationConfig::default()
        })
    });
    let admin = Caller::new("admin");
    let k = key("fresh/key");

    let outcome = h.service.rotate_detailed(&admin, &k).await.expect("rotate");
    assert!(matches!(
        outcome,
        RotationOutcome::Failed {
            attempted: Some(v),
            active: None,
            ..
        } if v == Version::FIRST
    ));
    assert_eq!(h.backend.len(), 1);
    let err = h.service.get_metadata(&admin, &k).await.expect_err("absent");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let report = scheduler_for(&h).tick(Utc::now()).await;
    assert_eq!(report.purged, 1);
    assert!(h.backend.is_empty());

    // The rejected candidate's number appears in the audit log, so it is
    // never handed out again.
    let version = h
        .service
        .set(&admin, &k, SecretValue::from("manual"), None)
        .await
        .expect("set");
    assert_eq!(version, Version::new(2));
    let meta = h.service.get_metadata(&admin, &k).await.expect("metadata");
    assert_eq!(meta.version, version);
}
