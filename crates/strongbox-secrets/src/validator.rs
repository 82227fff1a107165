//! Live validation of rotation candidates.
//!
//! A [`Validator`] checks that a freshly generated value works before it is
//! activated. Validators only judge the candidate; the rotation manager
//! bounds every call with a timeout and treats expiry as failure.
//!
//! Endpoints for live checks come from the secret's tags, falling back to a
//! configured default:
//!
//! - [`ENDPOINT_TAG`]: `host:port` for [`TcpConnectValidator`]
//! - [`PROBE_URL_TAG`]: URL for [`HttpProbeValidator`]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Classification, SecretKey, SecretValue, Version};

/// Tag naming the `host:port` a database credential is checked against.
pub const ENDPOINT_TAG: &str = "validation.endpoint";

/// Tag naming the URL an API key is probed against.
pub const PROBE_URL_TAG: &str = "validation.url";

/// A rotation candidate presented for validation.
#[derive(Debug)]
pub struct Candidate<'a> {
    /// The secret key.
    pub key: &'a SecretKey,
    /// The staged version number.
    pub version: Version,
    /// Classification of the secret.
    pub classification: Classification,
    /// Tags of the secret.
    pub tags: &'a BTreeMap<String, String>,
    /// The candidate value.
    pub value: &'a SecretValue,
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ValidationFailure {
    /// Human-readable reason, recorded in the audit trail.
    pub reason: String,
}

impl ValidationFailure {
    /// Creates a failure.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Boxed future returned by validators.
pub type ValidationFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<(), ValidationFailure>> + Send + 'a>>;

/// Live check of a rotation candidate.
pub trait Validator: Send + Sync {
    /// Accepts or rejects the candidate.
    fn validate<'a>(&'a self, candidate: &'a Candidate<'a>) -> ValidationFuture<'a>;
}

/// Shannon entropy of `bytes` in bits per symbol.
#[must_use]
pub fn shannon_entropy(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for b in bytes {
        counts[usize::from(*b)] += 1;
    }
    let len = bytes.len() as f64;
    counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Offline check: non-empty, long enough, and not trivially repetitive.
#[derive(Debug, Clone)]
pub struct EntropyValidator {
    min_length: usize,
    min_bits_per_symbol: f64,
}

impl EntropyValidator {
    /// Creates a validator with explicit thresholds.
    #[must_use]
    pub const fn new(min_length: usize, min_bits_per_symbol: f64) -> Self {
        Self {
            min_length,
            min_bits_per_symbol,
        }
    }

    fn check(&self, value: &SecretValue) -> std::result::Result<(), ValidationFailure> {
        if value.is_empty() {
            return Err(ValidationFailure::new("candidate is empty"));
        }
        if value.len() < self.min_length {
            return Err(ValidationFailure::new(format!(
                "candidate is {} bytes, minimum is {}",
                value.len(),
                self.min_length
            )));
        }
        let entropy = shannon_entropy(value.as_bytes());
        if entropy < self.min_bits_per_symbol {
            return Err(ValidationFailure::new(format!(
                "candidate entropy {entropy:.2} bits/symbol is below {:.2}",
                self.min_bits_per_symbol
            )));
        }
        Ok(())
    }
}

impl Default for EntropyValidator {
    fn default() -> Self {
        Self::new(16, 3.0)
    }
}

impl Validator for EntropyValidator {
    fn validate<'a>(&'a self, candidate: &'a Candidate<'a>) -> ValidationFuture<'a> {
        Box::pin(async move { self.check(candidate.value) })
    }
}

fn endpoint_for(
    candidate: &Candidate<'_>,
    tag: &str,
    default: Option<&String>,
) -> std::result::Result<String, ValidationFailure> {
    candidate
        .tags
        .get(tag)
        .or(default)
        .cloned()
        .ok_or_else(|| ValidationFailure::new(format!("no '{tag}' tag and no default endpoint")))
}

/// Checks that the database endpoint for a credential accepts connections.
///
/// Protocol-level login checks belong to a driver-specific validator
/// registered for the `database-password` classification.
#[derive(Debug, Clone)]
pub struct TcpConnectValidator {
    default_endpoint: Option<String>,
    connect_timeout: Duration,
}

impl TcpConnectValidator {
    /// Creates a validator with a per-attempt connect timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self {
            default_endpoint: None,
            connect_timeout,
        }
    }

    /// Sets the endpoint used when the secret has no endpoint tag.
    #[must_use]
    pub fn with_default_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.default_endpoint = Some(endpoint.into());
        self
    }
}

impl Validator for TcpConnectValidator {
    fn validate<'a>(&'a self, candidate: &'a Candidate<'a>) -> ValidationFuture<'a> {
        Box::pin(async move {
            if candidate.value.is_empty() {
                return Err(ValidationFailure::new("candidate is empty"));
            }
            let endpoint = endpoint_for(candidate, ENDPOINT_TAG, self.default_endpoint.as_ref())?;
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&endpoint)).await {
                Ok(Ok(_stream)) => {
                    debug!(endpoint = %endpoint, "database endpoint reachable");
                    Ok(())
                }
                Ok(Err(e)) => Err(ValidationFailure::new(format!(
                    "cannot connect to {endpoint}: {e}"
                ))),
                Err(_) => Err(ValidationFailure::new(format!(
                    "connect to {endpoint} timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))),
            }
        })
    }
}

/// Issues an authenticated GET with the candidate as bearer token.
/// Any 2xx status passes.
#[derive(Debug, Clone)]
pub struct HttpProbeValidator {
    client: reqwest::Client,
    default_url: Option<String>,
}

impl HttpProbeValidator {
    /// Creates a validator whose requests time out after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            default_url: None,
        })
    }

    /// Sets the URL used when the secret has no probe tag.
    #[must_use]
    pub fn with_default_url(mut self, url: impl Into<String>) -> Self {
        self.default_url = Some(url.into());
        self
    }
}

impl Validator for HttpProbeValidator {
    fn validate<'a>(&'a self, candidate: &'a Candidate<'a>) -> ValidationFuture<'a> {
        Box::pin(async move {
            let url = endpoint_for(candidate, PROBE_URL_TAG, self.default_url.as_ref())?;
            let token = candidate
                .value
                .as_str()
                .ok_or_else(|| ValidationFailure::new("api key is not valid UTF-8"))?;

            let response = self
                .client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| ValidationFailure::new(format!("probe {url} failed: {e}")))?;

            let status = response.status();
            if status.is_success() {
                debug!(url = %url, status = status.as_u16(), "api key probe succeeded");
                Ok(())
            } else {
                Err(ValidationFailure::new(format!(
                    "probe {url} returned {status}"
                )))
            }
        })
    }
}

/// Dispatches to a validator registered for the candidate's classification.
pub struct ClassificationValidator {
    by_classification: HashMap<Classification, Arc<dyn Validator>>,
    fallback: Arc<dyn Validator>,
}

impl ClassificationValidator {
    /// Creates a dispatcher using `fallback` for unregistered classifications.
    #[must_use]
    pub fn new(fallback: Arc<dyn Validator>) -> Self {
        Self {
            by_classification: HashMap::new(),
            fallback,
        }
    }

    /// Registers a validator for one classification.
    #[must_use]
    pub fn with(mut self, classification: Classification, validator: Arc<dyn Validator>) -> Self {
        self.by_classification.insert(classification, validator);
        self
    }
}

impl Default for ClassificationValidator {
    fn default() -> Self {
        Self::new(Arc::new(EntropyValidator::default()))
    }
}

impl std::fmt::Debug for ClassificationValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<&str> = self
            .by_classification
            .keys()
            .map(Classification::as_str)
            .collect();
        registered.sort_unstable();
        f.debug_struct("ClassificationValidator")
            .field("registered", &registered)
            .finish_non_exhaustive()
    }
}

impl Validator for ClassificationValidator {
    fn validate<'a>(&'a self, candidate: &'a Candidate<'a>) -> ValidationFuture<'a> {
        self.by_classification
            .get(&candidate.classification)
            .unwrap_or(&self.fallback)
            .validate(candidate)
    }
}
