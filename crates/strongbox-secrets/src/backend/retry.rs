//! Bounded exponential backoff for transient backend failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::{BackendFuture, SecretBackend, SharedBackend, WriteRequest};
use crate::error::BackendResult;
use crate::metrics::Metrics;
use crate::types::{SecretKey, SecretMetadata, SecretValue, Version, VersionInfo};

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retries.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Decorator retrying `Unreachable` failures of the wrapped backend.
///
/// `NotFound`, `Conflict`, `PermissionDenied` and storage errors are
/// returned on the first occurrence.
pub struct RetryingBackend {
    inner: SharedBackend,
    name: String,
    policy: RetryPolicy,
    metrics: Option<Metrics>,
}

impl RetryingBackend {
    /// Wraps `inner`, identified as `name` in logs and metrics.
    pub fn new(inner: SharedBackend, name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            name: name.into(),
            policy,
            metrics: None,
        }
    }

    /// Counts retries in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn run<'a, T, F>(&'a self, op: &'static str, mut call: F) -> BackendResult<T>
    where
        F: FnMut() -> BackendFuture<'a, T> + Send + 'a,
        T: Send + 'a,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        backend = %self.name,
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "backend call failed, retrying"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_backend_retry(&self.name);
                    }
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

impl std::fmt::Debug for RetryingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingBackend")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SecretBackend for RetryingBackend {
    fn get<'a>(
        &'a self,
        key: &'a SecretKey,
        version: Option<Version>,
    ) -> BackendFuture<'a, SecretValue> {
        Box::pin(self.run("get", move || self.inner.get(key, version)))
    }

    fn set<'a>(&'a self, key: &'a SecretKey, request: WriteRequest) -> BackendFuture<'a, Version> {
        Box::pin(self.run("set", move || self.inner.set(key, request.clone())))
    }

    fn activate<'a>(
        &'a self,
        key: &'a SecretKey,
        version: Version,
        at: DateTime<Utc>,
    ) -> BackendFuture<'a, SecretMetadata> {
        Box::pin(self.run("activate", move || self.inner.activate(key, version, at)))
    }

    fn discard<'a>(&'a self, key: &'a SecretKey, version: Version) -> BackendFuture<'a, ()> {
        Box::pin(self.run("discard", move || self.inner.discard(key, version)))
    }

    fn delete<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, ()> {
        Box::pin(self.run("delete", move || self.inner.delete(key)))
    }

    fn list(&self) -> BackendFuture<'_, Vec<SecretKey>> {
        Box::pin(self.run("list", move || self.inner.list()))
    }

    fn get_metadata<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, SecretMetadata> {
        Box::pin(self.run("get_metadata", move || self.inner.get_metadata(key)))
    }

    fn history<'a>(&'a self, key: &'a SecretKey) -> BackendFuture<'a, Vec<VersionInfo>> {
        Box::pin(self.run("history", move || self.inner.history(key)))
    }

    fn purge_deleted(&self, now: DateTime<Utc>) -> BackendFuture<'_, usize> {
        Box::pin(self.run("purge_deleted", move || self.inner.purge_deleted(now)))
    }
}
