//! Policy evaluation.
//!
//! [`PolicyEngine`] holds the working [`PolicySet`] behind an `Arc` that is
//! swapped as a whole on reload. Evaluations clone the `Arc` and work on
//! that snapshot, so a reload never exposes a partially updated set.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::condition::RequestContext;
use crate::error::{PolicyError, Result};
use crate::source::PolicySource;
use crate::types::{AccessPolicy, Action, Effect};

/// A validated, immutable set of policies.
#[derive(Debug, Clone)]
pub struct PolicySet {
    policies: Vec<AccessPolicy>,
    loaded_at: DateTime<Utc>,
}

impl PolicySet {
    /// Validates and wraps a list of policies.
    ///
    /// # Errors
    ///
    /// Returns an error if any policy is invalid or two policies share an id.
    pub fn new(policies: Vec<AccessPolicy>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(policies.len());
        for policy in &policies {
            policy.validate()?;
            if !seen.insert(policy.id.as_str()) {
                return Err(PolicyError::InvalidPolicy {
                    id: policy.id.clone(),
                    reason: "duplicate policy id".to_string(),
                });
            }
        }
        Ok(Self {
            policies,
            loaded_at: Utc::now(),
        })
    }

    /// Creates an empty set (everything is denied).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            policies: Vec::new(),
            loaded_at: Utc::now(),
        }
    }

    /// Returns the policies in declaration order.
    #[must_use]
    pub fn policies(&self) -> &[AccessPolicy] {
        &self.policies
    }

    /// Returns when the set was built.
    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Returns the number of policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns true if the set holds no policies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Evaluates a request against this set.
    #[must_use]
    pub fn evaluate(&self, request: &AccessRequest<'_>) -> Decision {
        let mut first_allow: Option<&AccessPolicy> = None;

        for policy in self
            .policies
            .iter()
            .filter(|p| p.matches(request.principal, request.key, request.action))
            .filter(|p| p.conditions_hold(request.context))
        {
            match policy.effect {
                Effect::Deny => {
                    return Decision {
                        effect: Effect::Deny,
                        policy_id: Some(policy.id.clone()),
                        reason: format!("denied by policy '{}'", policy.id),
                    };
                }
                Effect::Allow => {
                    first_allow.get_or_insert(policy);
                }
            }
        }

        match first_allow {
            Some(policy) => Decision {
                effect: Effect::Allow,
                policy_id: Some(policy.id.clone()),
                reason: format!("allowed by policy '{}'", policy.id),
            },
            None => Decision {
                effect: Effect::Deny,
                policy_id: None,
                reason: "no applicable policy".to_string(),
            },
        }
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::empty()
    }
}

/// A single authorization question.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    /// The requesting principal.
    pub principal: &'a str,
    /// The secret key, or `None` for collection-level actions.
    pub key: Option<&'a str>,
    /// The requested action.
    pub action: Action,
    /// Request attributes for condition evaluation.
    pub context: &'a RequestContext,
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Allow or deny.
    pub effect: Effect,
    /// The policy that decided, if any.
    pub policy_id: Option<String>,
    /// Human-readable explanation.
    pub reason: String,
}

impl Decision {
    /// Returns true if the request is allowed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }
}

/// Thread-safe evaluator over an atomically replaceable policy set.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    current: RwLock<Arc<PolicySet>>,
}

impl PolicyEngine {
    /// Creates an engine with the given policy set.
    #[must_use]
    pub fn new(set: PolicySet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    /// Creates an engine by loading from a source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be loaded or validated.
    pub fn from_source(source: &dyn PolicySource) -> Result<Self> {
        Ok(Self::new(PolicySet::new(source.load()?)?))
    }

    /// Returns the current policy set.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PolicySet> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the working set.
    pub fn replace(&self, set: PolicySet) {
        let count = set.len();
        *self.current.write() = Arc::new(set);
        info!(policies = count, "policy set replaced");
    }

    /// Reloads from a source. On failure the current set stays in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be loaded or validated.
    pub fn reload(&self, source: &dyn PolicySource) -> Result<usize> {
        let set = PolicySet::new(source.load()?)?;
        let count = set.len();
        self.replace(set);
        Ok(count)
    }

    /// Evaluates a request against the current set.
    #[must_use]
    pub fn evaluate(&self, request: &AccessRequest<'_>) -> Decision {
        let decision = self.snapshot().evaluate(request);
        debug!(
            principal = request.principal,
            action = %request.action,
            effect = %decision.effect,
            "policy evaluated"
        );
        decision
    }

    /// Decides whether `principal` may perform `action` on `key`.
    #[must_use]
    pub fn authorize(
        &self,
        principal: &str,
        key: &str,
        action: Action,
        context: &RequestContext,
    ) -> Decision {
        self.evaluate(&AccessRequest {
            principal,
            key: Some(key),
            action,
            context,
        })
    }

    /// Decides a collection-level action such as `list`.
    #[must_use]
    pub fn authorize_collection(
        &self,
        principal: &str,
        action: Action,
        context: &RequestContext,
    ) -> Decision {
        self.evaluate(&AccessRequest {
            principal,
            key: None,
            action,
            context,
        })
    }
}
