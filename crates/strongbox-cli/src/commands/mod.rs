//! CLI command implementations.
//!
//! - [`secret`] - One-shot secret operations
//! - [`serve`] - Rotation daemon

pub mod secret;
pub mod serve;

pub use secret::SecretCommand;
pub use serve::ServeCommand;
