//! # strongbox-secrets
//!
//! Secret lifecycle core: one [`SecretService`] in front of any number of
//! storage backends, with policy-checked access, audited decisions and
//! validated rotation.
//!
//! ## Features
//!
//! - [`SecretBackend`] - Storage capability, with [`MemoryBackend`] and
//!   encrypted [`FileBackend`] implementations
//! - [`Router`] - Ordered pattern rules mapping keys to backends
//! - [`RotationManager`] - Generate, stage, validate, then commit or roll back
//! - [`RotationScheduler`] - Periodic due scan on a bounded worker pool
//! - [`Validator`] - Live checks per classification (TCP connect, HTTP probe, entropy)
//! - [`NotificationSink`] - Fire-and-forget rotation events
//! - [`StrongboxConfig`] - JSON configuration for the whole service
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use strongbox_audit::{KeyHasher, MemoryAuditLog};
//! use strongbox_policy::{AccessPolicy, Action, PolicyEngine, PolicySet};
//! use strongbox_secrets::{
//!     Caller, MasterKey, MemoryBackend, Router, SecretKey, SecretService, SecretValue,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policies = PolicySet::new(vec![AccessPolicy::allow(
//!         "app-rw",
//!         "app/*",
//!         ["service-a"],
//!         [Action::Read, Action::Write],
//!     )?])?;
//!
//!     let service = SecretService::builder(
//!         Router::single("mem", Arc::new(MemoryBackend::new(MasterKey::generate()))),
//!         Arc::new(MemoryAuditLog::new()),
//!         KeyHasher::generate(),
//!     )
//!     .policy(Arc::new(PolicyEngine::new(policies)))
//!     .build();
//!
//!     let caller = Caller::new("service-a");
//!     let key = SecretKey::new("app/token")?;
//!     let version = service.set(&caller, &key, SecretValue::from("s3cr3t"), None).await?;
//!     let value = service.get(&caller, &key, None).await?;
//!
//!     assert_eq!(version.get(), 1);
//!     assert_eq!(value.as_str(), Some("s3cr3t"));
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod encryption;
pub mod error;
pub mod generator;
mod locks;
pub mod metrics;
pub mod notify;
pub mod record;
pub mod rotation;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod types;
pub mod validator;

// Re-export main types
pub use backend::{
    FileBackend, MemoryBackend, RetryPolicy, RetryingBackend, SecretBackend, SharedBackend,
    WriteRequest,
};
pub use config::StrongboxConfig;
pub use encryption::MasterKey;
pub use error::{BackendError, Error, ErrorKind, Result, RoutingError};
pub use generator::{ClassificationGenerator, ValueGenerator};
pub use metrics::Metrics;
pub use notify::{
    ChannelNotifier, FanoutNotifier, NotificationSink, RotationEvent, RotationEventKind, Severity,
    TracingNotifier,
};
pub use rotation::{RotationConfig, RotationManager, RotationOutcome, RotationState, SCHEDULER_PRINCIPAL};
pub use router::{Router, RouterBuilder};
pub use scheduler::{RotationScheduler, SchedulerConfig, TickReport};
pub use service::{Caller, SecretService, SecretServiceBuilder};
pub use types::{
    Classification, SecretAttributes, SecretKey, SecretMetadata, SecretValue, Version, VersionInfo,
    VersionStatus,
};
pub use validator::{
    ClassificationValidator, EntropyValidator, HttpProbeValidator, TcpConnectValidator,
    ValidationFailure, Validator,
};
