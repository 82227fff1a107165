//! # strongbox-audit
//!
//! Tamper-evident audit logging for Strongbox.
//!
//! Every authorization decision and every rotation attempt produces exactly
//! one [`AuditEntry`]. Entries never carry a raw secret key or value: keys are
//! recorded as a keyed BLAKE3 digest produced by a [`KeyHasher`], so an entry
//! cannot be reversed by inspection, while a caller who knows a key can still
//! find its entries by hashing it again.
//!
//! ## Features
//!
//! - [`AuditLog`] — Pluggable trait for audit backends (`append` + `query`)
//! - [`FileAuditLog`] — JSON-lines file, synced to disk before `append` returns
//! - [`MemoryAuditLog`] — In-process log for tests and embedded use
//! - [`AuditFilter`] — Query by time range, principal, action, result or key
//!
//! ## Example
//!
//! ```rust
//! use strongbox_audit::{
//!     AuditAction, AuditEntry, AuditFilter, AuditLog, AuditResult, KeyHasher, MemoryAuditLog,
//! };
//!
//! let hasher = KeyHasher::generate();
//! let log = MemoryAuditLog::new();
//!
//! let entry = AuditEntry::new("service-a", AuditAction::Read, AuditResult::Granted)
//!     .with_key_hash(hasher.hash("db/prod"));
//! log.append(&entry).expect("append");
//!
//! let found = log
//!     .query(&AuditFilter::new().for_key_hash(hasher.hash("db/prod")))
//!     .expect("query");
//! assert_eq!(found.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod entry;
pub mod error;
pub mod filter;
pub mod hasher;
pub mod log;

// Re-export main types
pub use entry::{AuditAction, AuditContext, AuditEntry, AuditResult};
pub use error::{AuditError, Result};
pub use filter::AuditFilter;
pub use hasher::{KeyHash, KeyHasher};
pub use log::{AuditLog, FileAuditLog, MemoryAuditLog};
