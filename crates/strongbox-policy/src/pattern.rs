//! Key and principal patterns.
//!
//! A [`Pattern`] is declared as a glob, a regular expression, a prefix or an
//! exact string and compiled once when the policy set or routing table is
//! built. In configuration a bare string is read as a glob:
//!
//! ```json
//! "db/*"
//! {"glob": "db/*"}
//! {"regex": "^db/(prod|staging)$"}
//! {"prefix": "db/"}
//! {"exact": "db/prod"}
//! ```
//!
//! Glob `*` matches any run of characters (including `/`), `?` matches one.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// Declared form of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSpec {
    /// Shell-style glob.
    Glob(String),
    /// Regular expression, used as written (add anchors yourself).
    Regex(String),
    /// Literal prefix.
    Prefix(String),
    /// Literal string.
    Exact(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Bare(String),
    Spec(PatternSpec),
}

#[derive(Clone)]
enum Matcher {
    Any,
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

/// A compiled pattern.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "RawPattern", into = "PatternSpec")]
pub struct Pattern {
    spec: PatternSpec,
    matcher: Matcher,
}

impl Pattern {
    /// Compiles a pattern from its declared form.
    ///
    /// # Errors
    ///
    /// Returns an error if a regular expression does not compile.
    pub fn new(spec: PatternSpec) -> Result<Self> {
        let matcher = match &spec {
            PatternSpec::Glob(glob) => compile_glob(glob)?,
            PatternSpec::Regex(expr) => Matcher::Regex(Regex::new(expr).map_err(|e| {
                PolicyError::InvalidPattern {
                    pattern: expr.clone(),
                    reason: e.to_string(),
                }
            })?),
            PatternSpec::Prefix(prefix) => Matcher::Prefix(prefix.clone()),
            PatternSpec::Exact(value) => Matcher::Exact(value.clone()),
        };
        Ok(Self { spec, matcher })
    }

    /// Compiles a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the glob cannot be translated.
    pub fn glob(glob: impl Into<String>) -> Result<Self> {
        Self::new(PatternSpec::Glob(glob.into()))
    }

    /// Compiles a regular-expression pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression does not compile.
    pub fn regex(expr: impl Into<String>) -> Result<Self> {
        Self::new(PatternSpec::Regex(expr.into()))
    }

    /// Builds a prefix pattern.
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            matcher: Matcher::Prefix(prefix.clone()),
            spec: PatternSpec::Prefix(prefix),
        }
    }

    /// Builds an exact-match pattern.
    #[must_use]
    pub fn exact(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            matcher: Matcher::Exact(value.clone()),
            spec: PatternSpec::Exact(value),
        }
    }

    /// Builds a pattern matching everything.
    #[must_use]
    pub fn any() -> Self {
        Self {
            spec: PatternSpec::Glob("*".to_string()),
            matcher: Matcher::Any,
        }
    }

    /// Returns the declared form.
    #[must_use]
    pub const fn spec(&self) -> &PatternSpec {
        &self.spec
    }

    /// Tests a candidate string.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Exact(value) => value == candidate,
            Matcher::Prefix(prefix) => candidate.starts_with(prefix.as_str()),
            Matcher::Regex(re) => re.is_match(candidate),
        }
    }
}

fn compile_glob(glob: &str) -> Result<Matcher> {
    if glob == "*" {
        return Ok(Matcher::Any);
    }
    if !glob.contains(['*', '?']) {
        return Ok(Matcher::Exact(glob.to_string()));
    }

    let mut expr = String::with_capacity(glob.len() * 2 + 2);
    expr.push('^');
    let mut literal = String::new();
    for c in glob.chars() {
        match c {
            '*' | '?' => {
                expr.push_str(&regex::escape(&literal));
                literal.clear();
                expr.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    expr.push_str(&regex::escape(&literal));
    expr.push('$');

    Regex::new(&expr)
        .map(Matcher::Regex)
        .map_err(|e| PolicyError::InvalidPattern {
            pattern: glob.to_string(),
            reason: e.to_string(),
        })
}

impl TryFrom<RawPattern> for Pattern {
    type Error = PolicyError;

    fn try_from(raw: RawPattern) -> Result<Self> {
        match raw {
            RawPattern::Bare(glob) => Self::glob(glob),
            RawPattern::Spec(spec) => Self::new(spec),
        }
    }
}

impl From<Pattern> for PatternSpec {
    fn from(pattern: Pattern) -> Self {
        pattern.spec
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

impl Eq for Pattern {}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.spec).finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.spec {
            PatternSpec::Glob(s) => write!(f, "glob:{s}"),
            PatternSpec::Regex(s) => write!(f, "regex:{s}"),
            PatternSpec::Prefix(s) => write!(f, "prefix:{s}"),
            PatternSpec::Exact(s) => write!(f, "exact:{s}"),
        }
    }
}
