//! Core policy types.
//!
//! - [`Action`]: An operation on a secret
//! - [`Effect`]: What a matching policy decides
//! - [`AccessPolicy`]: A rule mapping principals, secrets and actions to an effect

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::condition::{Condition, RequestContext};
use crate::error::{PolicyError, Result};
use crate::pattern::Pattern;

/// Actions that can be performed on secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Read a secret value or its metadata.
    Read,
    /// Write a new secret version.
    Write,
    /// Delete a secret.
    Delete,
    /// Rotate a secret.
    Rotate,
    /// Enumerate secret keys.
    List,
}

impl Action {
    /// Returns all possible actions.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Read, Self::Write, Self::Delete, Self::Rotate, Self::List]
    }

    /// Returns true for actions that target the collection rather than one key.
    #[must_use]
    pub const fn is_collection_level(&self) -> bool {
        matches!(self, Self::List)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Delete => write!(f, "delete"),
            Self::Rotate => write!(f, "rotate"),
            Self::List => write!(f, "list"),
        }
    }
}

impl FromStr for Action {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "delete" => Ok(Self::Delete),
            "rotate" => Ok(Self::Rotate),
            "list" => Ok(Self::List),
            _ => Err(PolicyError::InvalidPolicy {
                id: String::new(),
                reason: format!("unknown action '{s}'"),
            }),
        }
    }
}

/// The effect of an applicable policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Grant the request.
    Allow,
    /// Refuse the request. Overrides any allow.
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// An access policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Unique identifier within a policy set.
    pub id: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Secret keys the policy covers.
    pub secrets: Pattern,
    /// Principals the policy covers (any match suffices).
    pub principals: Vec<Pattern>,
    /// Actions the policy covers.
    pub actions: BTreeSet<Action>,
    /// Conditions that must all hold for the policy to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Decision when the policy applies.
    pub effect: Effect,
}

impl AccessPolicy {
    /// Builds a policy from glob patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a glob cannot be compiled.
    pub fn from_globs<'a>(
        id: impl Into<String>,
        effect: Effect,
        secrets: &str,
        principals: impl IntoIterator<Item = &'a str>,
        actions: impl IntoIterator<Item = Action>,
    ) -> Result<Self> {
        let principals = principals
            .into_iter()
            .map(Pattern::glob)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: id.into(),
            description: None,
            secrets: Pattern::glob(secrets)?,
            principals,
            actions: actions.into_iter().collect(),
            conditions: Vec::new(),
            effect,
        })
    }

    /// Builds an allow policy from glob patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a glob cannot be compiled.
    pub fn allow<'a>(
        id: impl Into<String>,
        secrets: &str,
        principals: impl IntoIterator<Item = &'a str>,
        actions: impl IntoIterator<Item = Action>,
    ) -> Result<Self> {
        Self::from_globs(id, Effect::Allow, secrets, principals, actions)
    }

    /// Builds a deny policy from glob patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a glob cannot be compiled.
    pub fn deny<'a>(
        id: impl Into<String>,
        secrets: &str,
        principals: impl IntoIterator<Item = &'a str>,
        actions: impl IntoIterator<Item = Action>,
    ) -> Result<Self> {
        Self::from_globs(id, Effect::Deny, secrets, principals, actions)
    }

    /// Adds a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Checks that the policy is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, or there are no principals or
    /// actions.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| PolicyError::InvalidPolicy {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("policy id cannot be empty"));
        }
        if self.principals.is_empty() {
            return Err(invalid("policy must name at least one principal pattern"));
        }
        if self.actions.is_empty() {
            return Err(invalid("policy must name at least one action"));
        }
        Ok(())
    }

    /// Returns true if principal, key and action all match.
    ///
    /// A `None` key is a collection-level request; the secret pattern is
    /// not consulted for it.
    #[must_use]
    pub fn matches(&self, principal: &str, key: Option<&str>, action: Action) -> bool {
        self.actions.contains(&action)
            && key.is_none_or(|k| self.secrets.matches(k))
            && self.principals.iter().any(|p| p.matches(principal))
    }

    /// Returns true if every condition holds.
    #[must_use]
    pub fn conditions_hold(&self, ctx: &RequestContext) -> bool {
        self.conditions.iter().all(|c| c.holds(ctx))
    }
}
