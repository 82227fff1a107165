//! Filter criteria for querying audit logs.

use chrono::{DateTime, Utc};

use crate::entry::{AuditAction, AuditEntry, AuditResult};
use crate::hasher::KeyHash;

/// Filter criteria for querying audit logs.
///
/// All set criteria must hold for an entry to match. Time bounds are
/// exclusive.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Filter by hashed secret key.
    pub key_hash: Option<KeyHash>,
    /// Filter by principal.
    pub principal: Option<String>,
    /// Filter by action type.
    pub action: Option<AuditAction>,
    /// Filter by result.
    pub result: Option<AuditResult>,
    /// Filter entries after this time.
    pub after: Option<DateTime<Utc>>,
    /// Filter entries before this time.
    pub before: Option<DateTime<Utc>>,
    /// Maximum number of entries to return (most recent ones are kept).
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// Creates a new empty filter that matches all entries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by hashed secret key.
    #[must_use]
    pub fn for_key_hash(mut self, key_hash: KeyHash) -> Self {
        self.key_hash = Some(key_hash);
        self
    }

    /// Filters by principal.
    #[must_use]
    pub fn by_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Filters by action type.
    #[must_use]
    pub const fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Filters by result.
    #[must_use]
    pub const fn with_result(mut self, result: AuditResult) -> Self {
        self.result = Some(result);
        self
    }

    /// Filters entries after a given time.
    #[must_use]
    pub const fn after(mut self, time: DateTime<Utc>) -> Self {
        self.after = Some(time);
        self
    }

    /// Filters entries before a given time.
    #[must_use]
    pub const fn before(mut self, time: DateTime<Utc>) -> Self {
        self.before = Some(time);
        self
    }

    /// Limits the number of returned entries.
    #[must_use]
    pub const fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Checks if an entry matches this filter.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(ref hash) = self.key_hash {
            if entry.key_hash.as_ref() != Some(hash) {
                return false;
            }
        }

        if let Some(ref principal) = self.principal {
            if &entry.principal != principal {
                return false;
            }
        }

        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }

        if let Some(result) = self.result {
            if entry.result != result {
                return false;
            }
        }

        if let Some(after) = self.after {
            if entry.timestamp <= after {
                return false;
            }
        }

        if let Some(before) = self.before {
            if entry.timestamp >= before {
                return false;
            }
        }

        true
    }

    /// Applies the filter to entries in append order, keeping the most
    /// recent `limit` matches in their original order.
    pub fn apply<'a, I>(&self, entries: I) -> Vec<AuditEntry>
    where
        I: IntoIterator<Item = &'a AuditEntry>,
    {
        let mut results: Vec<AuditEntry> = entries
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();

        if let Some(limit) = self.limit {
            if results.len() > limit {
                results.drain(..results.len() - limit);
            }
        }

        results
    }
}
