//! Prometheus metrics for access decisions and rotations.
//!
//! A [`Metrics`] value owns its registry; construct one per service and pass
//! clones to the components that record into it.
//!
//! ```rust
//! use strongbox_secrets::Metrics;
//!
//! let metrics = Metrics::new();
//! metrics.record_access("read", true);
//! metrics.record_rotation("api-key", "rotated", 0.2);
//! assert!(metrics.encode().contains("strongbox_access_decisions_total"));
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Labels for access decisions.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AccessLabels {
    /// The requested action.
    pub action: String,
    /// `granted` or `denied`.
    pub result: String,
}

/// Labels for rotation outcomes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RotationLabels {
    /// Classification of the rotated secret.
    pub classification: String,
    /// `rotated` or `failed`.
    pub outcome: String,
}

/// Labels for backend retries.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    /// Backend id.
    pub backend: String,
}

/// Counters and histograms exported by the secret service.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<RwLock<Registry>>,
    access_decisions: Family<AccessLabels, Counter>,
    rotations: Family<RotationLabels, Counter>,
    backend_retries: Family<BackendLabels, Counter>,
    rotation_duration_seconds: Histogram,
}

impl Metrics {
    /// Creates a registry with all metrics registered.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Counter names get the `_total` suffix on encoding.
        let access_decisions = Family::<AccessLabels, Counter>::default();
        registry.register(
            "strongbox_access_decisions",
            "Access policy decisions by action and result",
            access_decisions.clone(),
        );

        let rotations = Family::<RotationLabels, Counter>::default();
        registry.register(
            "strongbox_rotations",
            "Rotation attempts by classification and outcome",
            rotations.clone(),
        );

        let backend_retries = Family::<BackendLabels, Counter>::default();
        registry.register(
            "strongbox_backend_retries",
            "Backend calls retried after a transient failure",
            backend_retries.clone(),
        );

        // 10ms to ~40s
        let rotation_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "strongbox_rotation_duration_seconds",
            "Time taken by a rotation attempt, including validation",
            rotation_duration_seconds.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            access_decisions,
            rotations,
            backend_retries,
            rotation_duration_seconds,
        }
    }

    /// Counts one access decision.
    pub fn record_access(&self, action: &str, granted: bool) {
        self.access_decisions
            .get_or_create(&AccessLabels {
                action: action.to_string(),
                result: if granted { "granted" } else { "denied" }.to_string(),
            })
            .inc();
    }

    /// Counts one rotation attempt and observes its duration.
    pub fn record_rotation(&self, classification: &str, outcome: &str, seconds: f64) {
        self.rotations
            .get_or_create(&RotationLabels {
                classification: classification.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
        self.rotation_duration_seconds.observe(seconds);
    }

    /// Counts one backend retry.
    pub fn record_backend_retry(&self, backend: &str) {
        self.backend_retries
            .get_or_create(&BackendLabels {
                backend: backend.to_string(),
            })
            .inc();
    }

    /// Renders the text exposition format.
    #[must_use]
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            tracing::error!("failed to encode prometheus metrics");
            return String::new();
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_decisions_are_labelled() {
        let metrics = Metrics::new();
        metrics.record_access("read", true);
        metrics.record_access("read", true);
        metrics.record_access("write", false);

        let out = metrics.encode();
        assert!(out.contains(r#"strongbox_access_decisions_total{action="read",result="granted"} 2"#));
        assert!(out.contains(r#"strongbox_access_decisions_total{action="write",result="denied"} 1"#));
    }

    #[test]
    fn rotations_and_duration() {
        let metrics = Metrics::new();
        metrics.record_rotation("api-key", "failed", 1.5);

        let out = metrics.encode();
        assert!(out.contains(r#"strongbox_rotations_total{classification="api-key",outcome="failed"} 1"#));
        assert!(out.contains("strongbox_rotation_duration_seconds_count 1"));
    }

    #[test]
    fn clones_share_the_registry() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_backend_retry("vault");
        assert!(metrics.encode().contains(r#"strongbox_backend_retries_total{backend="vault"} 1"#));
    }
}
