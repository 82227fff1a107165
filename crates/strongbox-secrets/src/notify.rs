//! Rotation notifications.
//!
//! The rotation manager reports every attempt to a [`NotificationSink`].
//! Delivery is fire-and-forget: a sink error is logged and never fails or
//! delays the rotation that produced it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strongbox_audit::KeyHash;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::types::{Classification, Version};

/// Severity of a rotation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine success.
    Info,
    /// Needs an operator's attention.
    Alert,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationEventKind {
    /// A new version became active.
    Rotated,
    /// The candidate was rejected and the previous version kept.
    RotationFailed,
}

impl RotationEventKind {
    /// Severity implied by the kind.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::Rotated => Severity::Info,
            Self::RotationFailed => Severity::Alert,
        }
    }
}

impl fmt::Display for RotationEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rotated => write!(f, "rotated"),
            Self::RotationFailed => write!(f, "rotation_failed"),
        }
    }
}

/// A rotation report delivered to external collaborators.
///
/// Carries the secret key because the consumer is trusted infrastructure
/// (paging, ticketing); the value is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationEvent {
    /// The rotated key.
    pub key: String,
    /// Audit hash of the key, for correlating with the audit trail.
    pub key_hash: KeyHash,
    /// Classification of the secret.
    pub classification: Classification,
    /// Outcome.
    pub kind: RotationEventKind,
    /// Success is info, failure is an alert.
    pub severity: Severity,
    /// The new active version, or the rejected candidate.
    pub version: Option<Version>,
    /// The version active before the attempt.
    pub previous_version: Option<Version>,
    /// Failure reason.
    pub reason: Option<String>,
    /// When the attempt finished.
    pub at: DateTime<Utc>,
}

impl RotationEvent {
    /// Creates an event; severity follows the kind.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        key_hash: KeyHash,
        classification: Classification,
        kind: RotationEventKind,
    ) -> Self {
        Self {
            key: key.into(),
            key_hash,
            classification,
            kind,
            severity: kind.severity(),
            version: None,
            previous_version: None,
            reason: None,
            at: Utc::now(),
        }
    }

    /// Sets the attempted or committed version.
    #[must_use]
    pub const fn with_version(mut self, version: Option<Version>) -> Self {
        self.version = version;
        self
    }

    /// Sets the version active before the attempt.
    #[must_use]
    pub const fn with_previous(mut self, version: Option<Version>) -> Self {
        self.previous_version = version;
        self
    }

    /// Sets the failure reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A sink could not accept an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notification via '{sink}' failed: {reason}")]
pub struct NotifyError {
    /// Sink name.
    pub sink: String,
    /// What went wrong.
    pub reason: String,
}

/// Receives rotation events.
///
/// Implementations must not block; slow delivery belongs on a queue.
pub trait NotificationSink: Send + Sync + fmt::Debug {
    /// Returns the sink name used in logs.
    fn name(&self) -> &str;

    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the event could not be handed off.
    fn notify(&self, event: &RotationEvent) -> Result<(), NotifyError>;
}

/// Delivers to a sink, logging and swallowing any failure.
pub(crate) fn deliver(sink: &dyn NotificationSink, event: &RotationEvent) {
    if let Err(err) = sink.notify(event) {
        warn!(sink = sink.name(), key_hash = %event.key_hash, error = %err, "rotation notification dropped");
    }
}

/// Writes events to the `tracing` stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn name(&self) -> &str {
        "tracing"
    }

    fn notify(&self, event: &RotationEvent) -> Result<(), NotifyError> {
        let version = event.version.map(|v| v.get());
        match event.severity {
            Severity::Info => info!(
                key_hash = %event.key_hash,
                classification = %event.classification,
                version,
                "secret rotated"
            ),
            Severity::Alert => error!(
                key_hash = %event.key_hash,
                classification = %event.classification,
                version,
                reason = event.reason.as_deref().unwrap_or(""),
                "secret rotation failed"
            ),
        }
        Ok(())
    }
}

/// Forwards events over an unbounded channel to an external consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<RotationEvent>,
}

impl ChannelNotifier {
    /// Creates a notifier and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RotationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn name(&self) -> &str {
        "channel"
    }

    fn notify(&self, event: &RotationEvent) -> Result<(), NotifyError> {
        self.tx.send(event.clone()).map_err(|_| NotifyError {
            sink: self.name().to_string(),
            reason: "receiver closed".to_string(),
        })
    }
}

/// Delivers to every registered sink. One sink failing does not stop the
/// others; the first error is returned after all were tried.
#[derive(Debug, Default, Clone)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutNotifier {
    /// Creates an empty fanout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Returns the number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if there are no sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl NotificationSink for FanoutNotifier {
    fn name(&self) -> &str {
        "fanout"
    }

    fn notify(&self, event: &RotationEvent) -> Result<(), NotifyError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.notify(event) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
