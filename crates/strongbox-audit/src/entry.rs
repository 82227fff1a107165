//! Audit entry types.
//!
//! An [`AuditEntry`] is immutable once built: the builder methods consume
//! and return the entry, and no API mutates an entry after it was appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

use crate::hasher::KeyHash;

/// The operation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A secret value or its metadata was read.
    Read,
    /// A secret value was written.
    Write,
    /// A secret was deleted.
    Delete,
    /// A secret was rotated.
    Rotate,
    /// Secret keys were enumerated.
    List,
}

impl AuditAction {
    /// Returns the string representation of this action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Rotate => "rotate",
            Self::List => "list",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome recorded by an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    /// The access policy allowed the request.
    Granted,
    /// The access policy denied the request.
    Denied,
    /// A rotation committed a new active version.
    Rotated,
    /// A rotation attempt was rolled back.
    RotationFailed,
}

impl AuditResult {
    /// Returns the string representation of this result.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Rotated => "rotated",
            Self::RotationFailed => "rotation_failed",
        }
    }

    /// Returns true for outcomes that should raise an operator's attention.
    #[must_use]
    pub const fn is_alert(&self) -> bool {
        matches!(self, Self::Denied | Self::RotationFailed)
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request context captured alongside an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    /// Source address of the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    /// Deployment environment the caller runs in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Name of the calling service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl AuditContext {
    /// Returns true if no context field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.source_ip.is_none() && self.environment.is_none() && self.service.is_none()
    }
}

/// A single, immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier.
    pub id: Uuid,
    /// When the decision or rotation completed.
    pub timestamp: DateTime<Utc>,
    /// Identity of the caller (or `system` for scheduled rotations).
    pub principal: String,
    /// Keyed hash of the secret key. Absent for collection-level actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_hash: Option<KeyHash>,
    /// The action being audited.
    pub action: AuditAction,
    /// Outcome of the action.
    pub result: AuditResult,
    /// Secret version involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Human-readable explanation (matched policy, failure reason, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Request context, if the caller supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<AuditContext>,
}

impl AuditEntry {
    /// Creates a new entry stamped with the current time.
    #[must_use]
    pub fn new(principal: impl Into<String>, action: AuditAction, result: AuditResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            principal: principal.into(),
            key_hash: None,
            action,
            result,
            version: None,
            reason: None,
            context: None,
        }
    }

    /// Sets the hashed secret key.
    #[must_use]
    pub fn with_key_hash(mut self, key_hash: KeyHash) -> Self {
        self.key_hash = Some(key_hash);
        self
    }

    /// Sets the secret version.
    #[must_use]
    pub const fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches request context. Empty contexts are dropped.
    #[must_use]
    pub fn with_context(mut self, context: AuditContext) -> Self {
        self.context = (!context.is_empty()).then_some(context);
        self
    }

    /// Overrides the timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Serializes the entry to a single JSON line (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
