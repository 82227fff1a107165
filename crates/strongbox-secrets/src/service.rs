//! The secret service façade.
//!
//! Every public operation authorises the caller, records exactly one audit
//! entry and only then touches a backend. If the entry cannot be recorded
//! the operation fails with [`Error::AuditWriteFailure`] and the backend is
//! never called. Rotation records its entry once the outcome is known.
//!
//! | Operation | Action | Audit result |
//! |-----------|--------|--------------|
//! | [`get`](SecretService::get) | `read` | granted / denied |
//! | [`set`](SecretService::set) | `write` | granted / denied |
//! | [`delete`](SecretService::delete) | `delete` | granted / denied |
//! | [`list`](SecretService::list) | `list` | granted / denied |
//! | [`rotate`](SecretService::rotate) | `rotate` | rotated / rotation_failed / denied |
//! | [`get_metadata`](SecretService::get_metadata) | `read` | granted / denied |

use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use strongbox_audit::{
    AuditAction, AuditContext, AuditEntry, AuditFilter, AuditLog, AuditResult, KeyHash, KeyHasher,
};
use strongbox_policy::{AccessRequest, Action, Decision, PolicyEngine, RequestContext};
use tracing::{debug, error};

use crate::backend::WriteRequest;
use crate::error::{Error, Result};
use crate::generator::ValueGenerator;
use crate::metrics::Metrics;
use crate::notify::NotificationSink;
use crate::rotation::{RotationConfig, RotationManager, RotationOutcome, RotationState};
use crate::router::Router;
use crate::types::{SecretAttributes, SecretKey, SecretMetadata, SecretValue, Version, VersionInfo};
use crate::validator::Validator;

/// The authenticated identity behind a request, plus its context.
#[derive(Debug, Clone)]
pub struct Caller {
    /// Principal identifier.
    pub principal: String,
    /// Attributes evaluated by policy conditions.
    pub context: RequestContext,
}

impl Caller {
    /// Creates a caller with an empty context stamped now.
    #[must_use]
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            context: RequestContext::now(),
        }
    }

    /// Replaces the request context.
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    fn audit_context(&self) -> Option<AuditContext> {
        let ctx = AuditContext {
            source_ip: self.context.source_ip,
            environment: self.context.environment.clone(),
            service: self.context.service.clone(),
        };
        (!ctx.is_empty()).then_some(ctx)
    }
}

const fn audit_action(action: Action) -> AuditAction {
    match action {
        Action::Read => AuditAction::Read,
        Action::Write => AuditAction::Write,
        Action::Delete => AuditAction::Delete,
        Action::Rotate => AuditAction::Rotate,
        Action::List => AuditAction::List,
    }
}

/// Single entry point composing policy, routing, storage, rotation and audit.
pub struct SecretService {
    router: Arc<Router>,
    policy: Arc<PolicyEngine>,
    audit: Arc<dyn AuditLog>,
    hasher: Arc<KeyHasher>,
    rotation: Arc<RotationManager>,
    metrics: Metrics,
    conceal_denials: bool,
}

impl SecretService {
    /// Starts building a service.
    #[must_use]
    pub fn builder(router: Router, audit: Arc<dyn AuditLog>, hasher: KeyHasher) -> SecretServiceBuilder {
        SecretServiceBuilder {
            router,
            audit,
            hasher,
            policy: None,
            generator: None,
            validator: None,
            notifier: None,
            metrics: None,
            rotation: RotationConfig::default(),
            conceal_denials: false,
        }
    }

    /// Reads the active value, or a specific version.
    ///
    /// # Errors
    ///
    /// `AccessDenied` (or `NotFound` when denials are concealed), `NotFound`,
    /// a provider error, or `AuditWriteFailure`.
    pub async fn get(
        &self,
        caller: &Caller,
        key: &SecretKey,
        version: Option<Version>,
    ) -> Result<SecretValue> {
        self.authorize(caller, key, Action::Read)?;
        let routed = self.router.resolve(key);
        routed
            .backend()
            .get(key, version)
            .await
            .map_err(|e| Error::from_backend(routed.id(), e))
    }

    /// Writes a new active version and returns its number.
    ///
    /// Waits for any in-flight rotation of the key to finish first.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub async fn set(
        &self,
        caller: &Caller,
        key: &SecretKey,
        value: SecretValue,
        attributes: Option<SecretAttributes>,
    ) -> Result<Version> {
        self.write(caller, key, value, attributes, None).await
    }

    /// Writes a new version only if `expected` is the active version.
    ///
    /// # Errors
    ///
    /// `Conflict` if another write got there first, otherwise as for
    /// [`set`](Self::set).
    pub async fn compare_and_set(
        &self,
        caller: &Caller,
        key: &SecretKey,
        value: SecretValue,
        expected: Version,
    ) -> Result<Version> {
        self.write(caller, key, value, None, Some(expected)).await
    }

    async fn write(
        &self,
        caller: &Caller,
        key: &SecretKey,
        value: SecretValue,
        attributes: Option<SecretAttributes>,
        expected: Option<Version>,
    ) -> Result<Version> {
        self.authorize(caller, key, Action::Write)?;

        let slot = self.rotation.locks().slot(key);
        let _guard = slot.lock().await;

        let mut request = WriteRequest::new(value, Utc::now())
            .expecting(expected)
            .with_default_frequency(self.rotation.config().default_frequency_secs);
        if let Some(attributes) = attributes {
            request = request.with_attributes(attributes);
        }

        let routed = self.router.resolve(key);
        let version = routed
            .backend()
            .set(key, request)
            .await
            .map_err(|e| Error::from_backend(routed.id(), e))?;
        debug!(key_hash = %self.key_hash(key), version = version.get(), backend = routed.id(), "secret written");
        Ok(version)
    }

    /// Deletes a key.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub async fn delete(&self, caller: &Caller, key: &SecretKey) -> Result<()> {
        self.authorize(caller, key, Action::Delete)?;

        let slot = self.rotation.locks().slot(key);
        let _guard = slot.lock().await;

        let routed = self.router.resolve(key);
        routed
            .backend()
            .delete(key)
            .await
            .map_err(|e| Error::from_backend(routed.id(), e))?;
        debug!(key_hash = %self.key_hash(key), backend = routed.id(), "secret deleted");
        Ok(())
    }

    /// Lists the keys the caller may read, sorted.
    ///
    /// Keys the caller cannot read are omitted. The single audit entry
    /// records how many keys were visible.
    ///
    /// # Errors
    ///
    /// `AccessDenied` if `list` is not allowed, a provider error, or
    /// `AuditWriteFailure`.
    pub async fn list(&self, caller: &Caller) -> Result<Vec<SecretKey>> {
        let decision =
            self.policy
                .authorize_collection(&caller.principal, Action::List, &caller.context);
        self.metrics.record_access("list", decision.is_allowed());

        if !decision.is_allowed() {
            let entry = self.entry(caller, AuditAction::List, AuditResult::Denied, None, &decision);
            self.append(&entry)?;
            return Err(Error::AccessDenied {
                reason: decision.reason,
            });
        }

        let listed = self.list_routed(caller).await;
        let reason = match &listed {
            Ok((visible, total)) => format!(
                "{}; {} of {total} keys visible",
                decision.reason,
                visible.len()
            ),
            Err(err) => format!("{}; listing failed: {err}", decision.reason),
        };
        let entry = AuditEntry::new(&caller.principal, AuditAction::List, AuditResult::Granted)
            .with_reason(reason);
        self.append(&with_context(entry, caller))?;

        let (visible, _) = listed?;
        Ok(visible)
    }

    async fn list_routed(&self, caller: &Caller) -> Result<(Vec<SecretKey>, usize)> {
        let listings = try_join_all(self.router.backends().iter().map(|routed| async move {
            routed
                .backend()
                .list()
                .await
                .map(|keys| (routed, keys))
                .map_err(|e| Error::from_backend(routed.id(), e))
        }))
        .await?;

        let mut all = Vec::new();
        for (routed, keys) in listings {
            all.extend(keys.into_iter().filter(|k| self.router.routes_to(k, routed)));
        }
        all.sort();
        all.dedup();
        let total = all.len();

        // One snapshot for the whole filter so a concurrent reload cannot split it.
        let policy = self.policy.snapshot();
        all.retain(|key| {
            policy
                .evaluate(&AccessRequest {
                    principal: &caller.principal,
                    key: Some(key.as_str()),
                    action: Action::Read,
                    context: &caller.context,
                })
                .is_allowed()
        });
        Ok((all, total))
    }

    /// Rotates a key now and returns the new active version.
    ///
    /// Blocks while another rotation of the key is in flight, then reports
    /// that rotation's result.
    ///
    /// # Errors
    ///
    /// `Validation` if the candidate was rejected (the previous version stays
    /// active), otherwise as for [`get`](Self::get).
    pub async fn rotate(&self, caller: &Caller, key: &SecretKey) -> Result<Version> {
        match self.rotate_detailed(caller, key).await? {
            RotationOutcome::Rotated { version, .. } => Ok(version),
            RotationOutcome::Failed { reason, .. } => Err(Error::Validation { reason }),
        }
    }

    /// Rotates a key now and returns the full outcome.
    ///
    /// # Errors
    ///
    /// As for [`rotate`](Self::rotate), except that a rejected candidate is
    /// reported as [`RotationOutcome::Failed`].
    pub async fn rotate_detailed(&self, caller: &Caller, key: &SecretKey) -> Result<RotationOutcome> {
        let decision =
            self.policy
                .authorize(&caller.principal, key.as_str(), Action::Rotate, &caller.context);
        self.metrics.record_access("rotate", decision.is_allowed());

        if !decision.is_allowed() {
            let entry = self.entry(
                caller,
                AuditAction::Rotate,
                AuditResult::Denied,
                Some(self.key_hash(key)),
                &decision,
            );
            self.append(&entry)?;
            return Err(self.denied(key, decision));
        }

        self.rotation
            .rotate(key, &caller.principal, caller.audit_context())
            .await
    }

    /// Reads metadata of a key.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub async fn get_metadata(&self, caller: &Caller, key: &SecretKey) -> Result<SecretMetadata> {
        self.authorize(caller, key, Action::Read)?;
        let routed = self.router.resolve(key);
        routed
            .backend()
            .get_metadata(key)
            .await
            .map_err(|e| Error::from_backend(routed.id(), e))
    }

    /// Returns the version history of a key.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub async fn versions(&self, caller: &Caller, key: &SecretKey) -> Result<Vec<VersionInfo>> {
        self.authorize(caller, key, Action::Read)?;
        let routed = self.router.resolve(key);
        routed
            .backend()
            .history(key)
            .await
            .map_err(|e| Error::from_backend(routed.id(), e))
    }

    /// Reports where a key is in its rotation lifecycle.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub async fn rotation_state(&self, caller: &Caller, key: &SecretKey) -> Result<RotationState> {
        self.authorize(caller, key, Action::Read)?;
        self.rotation.state(key).await
    }

    /// Returns the audit hash of a key, for querying its entries.
    #[must_use]
    pub fn key_hash(&self, key: &SecretKey) -> KeyHash {
        self.hasher.hash(key.as_str())
    }

    /// Queries the audit log.
    ///
    /// # Errors
    ///
    /// Returns `AuditWriteFailure` if the log cannot be read.
    pub fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.audit.query(filter).map_err(Error::AuditWriteFailure)
    }

    /// Returns the policy engine, for reloads.
    #[must_use]
    pub const fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// Returns the rotation manager.
    #[must_use]
    pub const fn rotation(&self) -> &Arc<RotationManager> {
        &self.rotation
    }

    /// Returns the metrics registry.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn authorize(&self, caller: &Caller, key: &SecretKey, action: Action) -> Result<()> {
        let decision =
            self.policy
                .authorize(&caller.principal, key.as_str(), action, &caller.context);
        let allowed = decision.is_allowed();
        self.metrics.record_access(&action.to_string(), allowed);

        let result = if allowed {
            AuditResult::Granted
        } else {
            AuditResult::Denied
        };
        let entry = self.entry(
            caller,
            audit_action(action),
            result,
            Some(self.key_hash(key)),
            &decision,
        );
        self.append(&entry)?;

        if allowed {
            Ok(())
        } else {
            Err(self.denied(key, decision))
        }
    }

    fn denied(&self, key: &SecretKey, decision: Decision) -> Error {
        if self.conceal_denials {
            Error::NotFound {
                what: key.to_string(),
            }
        } else {
            Error::AccessDenied {
                reason: decision.reason,
            }
        }
    }

    fn entry(
        &self,
        caller: &Caller,
        action: AuditAction,
        result: AuditResult,
        key_hash: Option<KeyHash>,
        decision: &Decision,
    ) -> AuditEntry {
        let mut entry = AuditEntry::new(&caller.principal, action, result)
            .with_reason(decision.reason.clone());
        if let Some(hash) = key_hash {
            entry = entry.with_key_hash(hash);
        }
        with_context(entry, caller)
    }

    fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.append(entry).map_err(|err| {
            error!(
                principal = %entry.principal,
                action = %entry.action,
                error = %err,
                "audit write failed, refusing operation"
            );
            Error::AuditWriteFailure(err)
        })
    }
}

fn with_context(entry: AuditEntry, caller: &Caller) -> AuditEntry {
    match caller.audit_context() {
        Some(ctx) => entry.with_context(ctx),
        None => entry,
    }
}

impl std::fmt::Debug for SecretService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretService")
            .field("router", &self.router)
            .field("conceal_denials", &self.conceal_denials)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SecretService`].
pub struct SecretServiceBuilder {
    router: Router,
    audit: Arc<dyn AuditLog>,
    hasher: KeyHasher,
    policy: Option<Arc<PolicyEngine>>,
    generator: Option<Arc<dyn ValueGenerator>>,
    validator: Option<Arc<dyn Validator>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    metrics: Option<Metrics>,
    rotation: RotationConfig,
    conceal_denials: bool,
}

impl SecretServiceBuilder {
    /// Uses `policy` for authorisation. Without one every request is denied.
    #[must_use]
    pub fn policy(mut self, policy: Arc<PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Replaces the rotation value generator.
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn ValueGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Replaces the rotation validator.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Sends rotation events to `notifier`.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Records into `metrics`.
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets rotation behaviour.
    #[must_use]
    pub fn rotation_config(mut self, config: RotationConfig) -> Self {
        self.rotation = config;
        self
    }

    /// Reports denials as not-found so callers cannot probe for existence.
    ///
    /// Only key-scoped calls are concealed. A denied `list` names no key, so
    /// it still returns `AccessDenied`.
    #[must_use]
    pub const fn conceal_denials(mut self, conceal: bool) -> Self {
        self.conceal_denials = conceal;
        self
    }

    /// Assembles the service.
    #[must_use]
    pub fn build(self) -> SecretService {
        let router = Arc::new(self.router);
        let hasher = Arc::new(self.hasher);
        let metrics = self.metrics.unwrap_or_default();

        let mut rotation = RotationManager::new(Arc::clone(&router), Arc::clone(&self.audit), Arc::clone(&hasher))
            .with_metrics(metrics.clone())
            .with_config(self.rotation);
        if let Some(generator) = self.generator {
            rotation = rotation.with_generator(generator);
        }
        if let Some(validator) = self.validator {
            rotation = rotation.with_validator(validator);
        }
        if let Some(notifier) = self.notifier {
            rotation = rotation.with_notifier(notifier);
        }

        SecretService {
            router,
            policy: self.policy.unwrap_or_default(),
            audit: self.audit,
            hasher,
            rotation: Arc::new(rotation),
            metrics,
            conceal_denials: self.conceal_denials,
        }
    }
}
