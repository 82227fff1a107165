//! Service configuration.
//!
//! One JSON document describes backends, routing, audit, rotation, retry
//! and policy settings:
//!
//! ```json
//! {
//!   "backends": [
//!     {"kind": "file", "id": "vault", "dir": "/var/lib/strongbox/vault", "retention_days": 30},
//!     {"kind": "memory", "id": "scratch"}
//!   ],
//!   "default_backend": "vault",
//!   "routes": [
//!     {"match": {"prefix": "tmp/"}, "backend": "scratch"}
//!   ],
//!   "audit": {"path": "/var/log/strongbox/audit.jsonl", "hash_key": "<64 hex chars>"},
//!   "policies": {"path": "/etc/strongbox/policies.json", "reload_secs": 60}
//! }
//! ```
//!
//! Routing mistakes (no default, duplicate ids, routes to unknown backends)
//! are reported when the router is built, before any request is served.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strongbox_audit::{FileAuditLog, KeyHasher};
use strongbox_policy::{FilePolicySource, Pattern, PolicyEngine};
use tracing::{debug, info};

use crate::backend::{FileBackend, MemoryBackend, RetryPolicy, RetryingBackend, SharedBackend};
use crate::encryption::MasterKey;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::rotation::RotationConfig;
use crate::router::Router;
use crate::scheduler::SchedulerConfig;
use crate::service::{SecretService, SecretServiceBuilder};
use crate::types::{Classification, frequency_delta};
use crate::validator::{
    ClassificationValidator, EntropyValidator, HttpProbeValidator, TcpConnectValidator,
};

/// Environment variable read for the master key unless configured otherwise.
pub const DEFAULT_MASTER_KEY_ENV: &str = "STRONGBOX_MASTER_KEY";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// A storage backend declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Process-local storage; contents are lost on exit.
    Memory {
        /// Backend id used by routes.
        id: String,
    },
    /// Encrypted JSON records in a directory.
    File {
        /// Backend id used by routes.
        id: String,
        /// Record directory.
        dir: PathBuf,
        /// Days a soft-deleted key is kept before purge.
        #[serde(default)]
        retention_days: u64,
    },
}

impl BackendConfig {
    /// Returns the backend id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Memory { id } | Self::File { id, .. } => id,
        }
    }
}

/// A routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Key predicate.
    #[serde(rename = "match")]
    pub pattern: Pattern,
    /// Target backend id.
    pub backend: String,
}

/// Audit log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Append-only JSON-lines file.
    pub path: PathBuf,
    /// Hex-encoded 32-byte key for hashing secret keys.
    pub hash_key: String,
}

/// Rotation and scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    /// Seconds between due scans.
    pub tick_secs: u64,
    /// Maximum concurrent rotations.
    pub workers: usize,
    /// Seconds a validator may take.
    pub validation_timeout_secs: u64,
    /// Rotation frequency for keys that do not set one.
    pub default_frequency_days: u64,
    /// Whether `rotate` may create a missing key.
    pub create_missing: bool,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            tick_secs: 3600,
            workers: 4,
            validation_timeout_secs: 30,
            default_frequency_days: 90,
            create_missing: false,
        }
    }
}

/// Backoff for transient backend failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// First delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor.
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: u64::try_from(policy.initial_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(policy.max_delay.as_millis()).unwrap_or(u64::MAX),
            multiplier: policy.multiplier,
        }
    }
}

/// Where policies come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Policy document path.
    pub path: PathBuf,
    /// Seconds between hot reloads; `0` disables reloading.
    #[serde(default)]
    pub reload_secs: u64,
}

/// Live validation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorSettings {
    /// Timeout for a single connect or HTTP probe, in seconds.
    pub probe_timeout_secs: u64,
    /// `host:port` for database credentials without an endpoint tag.
    pub database_endpoint: Option<String>,
    /// URL for API keys without a probe tag.
    pub api_probe_url: Option<String>,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 10,
            database_endpoint: None,
            api_probe_url: None,
        }
    }
}

fn default_master_key_env() -> String {
    DEFAULT_MASTER_KEY_ENV.to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrongboxConfig {
    /// Storage backends.
    pub backends: Vec<BackendConfig>,
    /// Backend for keys no route matches.
    pub default_backend: String,
    /// Ordered routing rules; the first match wins.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Audit log.
    pub audit: AuditSettings,
    /// Rotation and scheduling.
    #[serde(default)]
    pub rotation: RotationSettings,
    /// Backend retry.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Policy source. Without one every request is denied.
    #[serde(default)]
    pub policies: Option<PolicySettings>,
    /// Live validators.
    #[serde(default)]
    pub validators: ValidatorSettings,
    /// Report denials as not-found.
    #[serde(default)]
    pub conceal_denials: bool,
    /// Environment variable holding the hex master key.
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
}

impl StrongboxConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a config error for malformed JSON or invalid settings.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a config error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_json(&text)?;
        debug!(path = %path.display(), backends = config.backends.len(), "configuration loaded");
        Ok(config)
    }

    /// Checks settings that routing does not cover.
    ///
    /// # Errors
    ///
    /// Returns a config error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::config("at least one backend is required"));
        }
        if self.rotation.workers == 0 {
            return Err(Error::config("rotation.workers must be at least 1"));
        }
        if self.rotation.tick_secs == 0 {
            return Err(Error::config("rotation.tick_secs must be at least 1"));
        }
        if self.rotation.validation_timeout_secs == 0 {
            return Err(Error::config("rotation.validation_timeout_secs must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts must be at least 1"));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(Error::config("retry.multiplier must be at least 1.0"));
        }
        self.hasher()?;
        Ok(())
    }

    /// Builds the audit key hasher.
    ///
    /// # Errors
    ///
    /// Returns a config error if the hash key is not 32 hex-encoded bytes.
    pub fn hasher(&self) -> Result<KeyHasher> {
        KeyHasher::from_hex(&self.audit.hash_key)
            .map_err(|e| Error::config(format!("audit.hash_key: {e}")))
    }

    /// Reads the master key from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns a config error if the variable is unset or malformed.
    pub fn master_key(&self) -> Result<MasterKey> {
        self.master_key_from(|name| std::env::var(name).ok())
    }

    /// Reads the master key through `lookup`.
    ///
    /// # Errors
    ///
    /// As for [`master_key`](Self::master_key).
    pub fn master_key_from(&self, lookup: impl FnOnce(&str) -> Option<String>) -> Result<MasterKey> {
        let encoded = lookup(&self.master_key_env)
            .ok_or_else(|| Error::config(format!("{} is not set", self.master_key_env)))?;
        MasterKey::from_hex(&encoded)
    }

    /// Backoff policy for every backend.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            multiplier: self.retry.multiplier,
        }
    }

    /// Rotation manager settings.
    #[must_use]
    pub fn rotation_config(&self) -> RotationConfig {
        RotationConfig {
            validation_timeout: Duration::from_secs(self.rotation.validation_timeout_secs),
            default_frequency_secs: self.rotation.default_frequency_days.saturating_mul(SECS_PER_DAY),
            create_missing: self.rotation.create_missing,
        }
    }

    /// Scheduler settings.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick: Duration::from_secs(self.rotation.tick_secs),
            workers: self.rotation.workers,
        }
    }

    /// Hot-reload interval, if reloading is enabled.
    #[must_use]
    pub fn policy_reload_interval(&self) -> Option<Duration> {
        self.policies
            .as_ref()
            .filter(|p| p.reload_secs > 0)
            .map(|p| Duration::from_secs(p.reload_secs))
    }

    /// The configured policy file, if any.
    #[must_use]
    pub fn policy_source(&self) -> Option<FilePolicySource> {
        self.policies
            .as_ref()
            .map(|p| FilePolicySource::new(p.path.clone()))
    }

    /// Loads the initial policy set. Without a policy file the set is empty.
    ///
    /// # Errors
    ///
    /// Returns a config error if the policy file is unreadable or invalid.
    pub fn policy_engine(&self) -> Result<PolicyEngine> {
        match self.policy_source() {
            Some(source) => PolicyEngine::from_source(&source)
                .map_err(|e| Error::config(format!("policies: {e}"))),
            None => Ok(PolicyEngine::default()),
        }
    }

    /// Builds the validator used for rotation.
    ///
    /// # Errors
    ///
    /// Returns a config error if the HTTP client cannot be created.
    pub fn validator(&self) -> Result<ClassificationValidator> {
        let timeout = Duration::from_secs(self.validators.probe_timeout_secs);

        let mut database = TcpConnectValidator::new(timeout);
        if let Some(endpoint) = &self.validators.database_endpoint {
            database = database.with_default_endpoint(endpoint.clone());
        }
        let mut api = HttpProbeValidator::new(timeout)?;
        if let Some(url) = &self.validators.api_probe_url {
            api = api.with_default_url(url.clone());
        }

        Ok(ClassificationValidator::new(Arc::new(EntropyValidator::default()))
            .with(Classification::DatabasePassword, Arc::new(database))
            .with(Classification::ApiKey, Arc::new(api)))
    }

    /// Opens every backend, wraps it in the retry layer and builds the router.
    ///
    /// # Errors
    ///
    /// Returns `Routing` for routing mistakes and a provider error if a
    /// backend cannot be opened.
    pub fn build_router(&self, master: &MasterKey, metrics: &Metrics) -> Result<Router> {
        let retry = self.retry_policy();
        let mut builder = Router::builder();

        for declared in &self.backends {
            let raw: SharedBackend = match declared {
                BackendConfig::Memory { .. } => Arc::new(MemoryBackend::new(master.clone())),
                BackendConfig::File {
                    id,
                    dir,
                    retention_days,
                } => {
                    let retention = frequency_delta(retention_days.saturating_mul(SECS_PER_DAY));
                    Arc::new(
                        FileBackend::open(dir.clone(), master.clone(), retention)
                            .map_err(|e| Error::from_backend(id, e))?,
                    )
                }
            };
            let wrapped = RetryingBackend::new(raw, declared.id(), retry.clone())
                .with_metrics(metrics.clone());
            builder = builder.backend(declared.id(), Arc::new(wrapped));
        }

        for route in &self.routes {
            builder = builder.route(route.pattern.clone(), route.backend.clone());
        }

        Ok(builder.default_backend(self.default_backend.clone()).build()?)
    }

    /// Prepares a service builder with every configured component.
    ///
    /// The caller may still override components (for example the notifier)
    /// before building.
    ///
    /// # Errors
    ///
    /// Returns the first error from opening backends, the audit log, the
    /// policy file or the validators.
    pub fn service_builder(&self, master: &MasterKey, metrics: &Metrics) -> Result<SecretServiceBuilder> {
        let router = self.build_router(master, metrics)?;
        let audit = FileAuditLog::open(&self.audit.path)
            .map_err(|e| Error::config(format!("audit log {}: {e}", self.audit.path.display())))?;
        let policy = self.policy_engine()?;

        info!(
            backends = self.backends.len(),
            routes = self.routes.len(),
            policies = policy.snapshot().len(),
            audit = %self.audit.path.display(),
            "service configured"
        );

        Ok(SecretService::builder(router, Arc::new(audit), self.hasher()?)
            .policy(Arc::new(policy))
            .validator(Arc::new(self.validator()?))
            .metrics(metrics.clone())
            .rotation_config(self.rotation_config())
            .conceal_denials(self.conceal_denials))
    }
}
