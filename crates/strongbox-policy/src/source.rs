//! Where policy sets come from.
//!
//! A [`PolicySource`] produces the raw policy list; the engine validates it
//! and swaps it in. [`FilePolicySource`] reads a JSON document of the form:
//!
//! ```json
//! {
//!   "policies": [
//!     {"id": "ops-read", "secrets": "db/*", "principals": ["ops-*"],
//!      "actions": ["read"], "effect": "allow"}
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::types::AccessPolicy;

/// A provider of policy definitions.
pub trait PolicySource: Send + Sync {
    /// Loads the current policy list.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions cannot be read or parsed.
    fn load(&self) -> Result<Vec<AccessPolicy>>;

    /// Describes the source for diagnostics.
    fn describe(&self) -> String;
}

/// A fixed, in-memory policy list.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicySource {
    policies: Vec<AccessPolicy>,
}

impl StaticPolicySource {
    /// Wraps a list of policies.
    #[must_use]
    pub const fn new(policies: Vec<AccessPolicy>) -> Self {
        Self { policies }
    }
}

impl PolicySource for StaticPolicySource {
    fn load(&self) -> Result<Vec<AccessPolicy>> {
        Ok(self.policies.clone())
    }

    fn describe(&self) -> String {
        format!("static ({} policies)", self.policies.len())
    }
}

/// On-disk policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// The policies, in declaration order.
    #[serde(default)]
    pub policies: Vec<AccessPolicy>,
}

impl PolicyDocument {
    /// Parses a document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid document.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes the document as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Policies read from a JSON file on every load.
#[derive(Debug, Clone)]
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    /// Creates a source reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicySource for FilePolicySource {
    fn load(&self) -> Result<Vec<AccessPolicy>> {
        let text = std::fs::read_to_string(&self.path)?;
        let document = PolicyDocument::from_json(&text)?;
        debug!(
            path = %self.path.display(),
            policies = document.policies.len(),
            "loaded policy document"
        );
        Ok(document.policies)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
