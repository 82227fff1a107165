//! Command-line argument parsing with clap.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Strongbox - secret lifecycle management.
#[derive(Parser, Debug, Clone)]
#[command(name = "strongbox")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "STRONGBOX_CONFIG", default_value = "strongbox.json")]
    pub config: PathBuf,

    /// Principal the request is made as.
    #[arg(short, long, env = "STRONGBOX_PRINCIPAL", default_value = "")]
    pub principal: String,

    /// Source address evaluated by ip-range conditions.
    #[arg(long)]
    pub source_ip: Option<IpAddr>,

    /// Environment evaluated by environment conditions.
    #[arg(long)]
    pub environment: Option<String>,

    /// Calling service evaluated by service conditions.
    #[arg(long)]
    pub service: Option<String>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Log line format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the rotation scheduler and policy reloader until interrupted.
    Serve(ServeArgs),

    /// Read a secret value.
    Get {
        /// Secret key.
        key: String,

        /// Read this version instead of the active one.
        #[arg(long)]
        version: Option<u64>,
    },

    /// Write a new version of a secret.
    Set(SetArgs),

    /// Delete a secret.
    Delete {
        /// Secret key.
        key: String,
    },

    /// List secrets readable by the principal.
    List,

    /// Rotate a secret now.
    Rotate {
        /// Secret key.
        key: String,
    },

    /// Show a secret's metadata.
    Metadata {
        /// Secret key.
        key: String,
    },

    /// Show a secret's version history.
    Versions {
        /// Secret key.
        key: String,
    },

    /// Show a secret's rotation state.
    State {
        /// Secret key.
        key: String,
    },

    /// Query the audit log.
    Audit(AuditArgs),
}

/// Arguments for the serve command.
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Write Prometheus metrics to this file after every scheduler tick.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

/// Arguments for the set command.
#[derive(Parser, Debug, Clone)]
pub struct SetArgs {
    /// Secret key.
    pub key: String,

    /// Secret value. Read from standard input when omitted.
    #[arg(long, conflicts_with = "file")]
    pub value: Option<String>,

    /// Read the value from a file.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Classification (database-password, api-key, jwt-signing, generic).
    #[arg(long)]
    pub classification: Option<String>,

    /// Rotation frequency in days.
    #[arg(long)]
    pub rotation_days: Option<u64>,

    /// Tags (KEY=VALUE).
    #[arg(short, long, value_name = "KEY=VALUE")]
    pub tag: Vec<String>,

    /// Fail unless this is the current version.
    #[arg(long)]
    pub expect_version: Option<u64>,
}

/// Arguments for the audit command.
#[derive(Parser, Debug, Clone)]
pub struct AuditArgs {
    /// Only entries for this secret key.
    #[arg(long)]
    pub key: Option<String>,

    /// Only entries made by this principal.
    #[arg(long = "by")]
    pub by_principal: Option<String>,

    /// Only entries with this result (granted, denied, rotated, rotation_failed).
    #[arg(long)]
    pub result: Option<String>,

    /// Maximum entries to show.
    #[arg(short = 'n', long, default_value_t = 50)]
    pub limit: usize,
}
