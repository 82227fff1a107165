//! # strongbox-policy
//!
//! Policy-driven access control for Strongbox secrets.
//!
//! A [`PolicyEngine`] answers one question: may this principal perform this
//! action on this secret key, given this request context? Evaluation follows
//! a fixed order:
//!
//! 1. Collect policies whose principal pattern, secret pattern and action set
//!    all match the request.
//! 2. Keep only those whose conditions all hold for the request context.
//! 3. Any remaining `deny` policy denies.
//! 4. Otherwise any remaining `allow` policy allows.
//! 5. Otherwise deny.
//!
//! Policies carry no priority. The working set is swapped atomically on
//! reload, so concurrent evaluations always see one complete set.
//!
//! ## Example
//!
//! ```rust
//! use strongbox_policy::{AccessPolicy, Action, PolicyEngine, PolicySet, RequestContext};
//!
//! let set = PolicySet::new(vec![
//!     AccessPolicy::deny("no-db-reads", "db/*", ["*"], [Action::Read]).expect("policy"),
//!     AccessPolicy::allow("svc-a-db", "db/*", ["service-a"], [Action::Read]).expect("policy"),
//! ])
//! .expect("valid set");
//! let engine = PolicyEngine::new(set);
//!
//! let decision = engine.authorize("service-a", "db/prod", Action::Read, &RequestContext::now());
//! assert!(!decision.is_allowed());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod condition;
pub mod engine;
pub mod error;
pub mod pattern;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use condition::{Condition, RequestContext};
pub use engine::{AccessRequest, Decision, PolicyEngine, PolicySet};
pub use error::{PolicyError, Result};
pub use pattern::{Pattern, PatternSpec};
pub use source::{FilePolicySource, PolicyDocument, PolicySource, StaticPolicySource};
pub use types::{AccessPolicy, Action, Effect};
