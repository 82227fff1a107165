//! # strongbox-cli
//!
//! Command-line front end for the Strongbox secret service.
//!
//! Two modes:
//! - `serve` runs the rotation scheduler, policy hot reload and metrics
//!   export until interrupted
//! - every other subcommand performs one audited service call as the
//!   principal given with `--principal`
//!
//! All components are built from one JSON configuration file; see
//! [`strongbox_secrets::config`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format, LogFormat};
pub use error::CliError;
pub use output::OutputFormat;
