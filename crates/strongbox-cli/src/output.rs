//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use serde::Serialize;
use strongbox_audit::AuditEntry;
use strongbox_secrets::{RotationOutcome, RotationState, SecretKey, SecretMetadata, Version, VersionInfo};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a value in the selected format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => value.write_table(writer)?,
        }
        Ok(())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// A secret value as printed by `get`.
#[derive(Debug, Clone, Serialize)]
pub struct ValueOutput {
    /// The key read.
    pub key: String,
    /// The value, lossily decoded as UTF-8.
    pub value: String,
}

impl TableDisplay for ValueOutput {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}", self.value)?;
        Ok(())
    }
}

/// Result of a write or rotation.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutput {
    /// The key written.
    pub key: String,
    /// The operation performed.
    pub operation: &'static str,
    /// The version active afterwards.
    pub version: Option<Version>,
    /// Human-readable summary.
    pub message: String,
}

impl WriteOutput {
    /// Summarises a rotation outcome.
    #[must_use]
    pub fn from_rotation(key: &SecretKey, outcome: &RotationOutcome) -> Self {
        let message = match outcome {
            RotationOutcome::Rotated { version, previous } => match previous {
                Some(previous) => format!("rotated {key} from v{previous} to v{version}"),
                None => format!("created {key} at v{version}"),
            },
            RotationOutcome::Failed { reason, .. } => {
                format!("rotation of {key} failed, previous version kept: {reason}")
            }
        };
        Self {
            key: key.to_string(),
            operation: if outcome.is_rotated() { "rotated" } else { "rotation_failed" },
            version: outcome.active_version(),
            message,
        }
    }
}

impl TableDisplay for WriteOutput {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}", self.message)?;
        Ok(())
    }
}

/// Keys returned by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct KeyList {
    /// Visible keys, sorted.
    pub keys: Vec<SecretKey>,
}

impl TableDisplay for KeyList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.keys.is_empty() {
            writeln!(writer, "No secrets visible.")?;
            return Ok(());
        }
        for key in &self.keys {
            writeln!(writer, "{key}")?;
        }
        writeln!(writer)?;
        writeln!(writer, "{} secret(s)", self.keys.len())?;
        Ok(())
    }
}

impl TableDisplay for SecretMetadata {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Secret: {}", self.key)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Version:         v{}", self.version)?;
        writeln!(writer, "Classification:  {}", self.classification)?;
        writeln!(
            writer,
            "Rotation:        every {} day(s)",
            self.rotation_frequency_secs / 86_400
        )?;
        writeln!(writer, "Last rotated:    {}", self.last_rotated.to_rfc3339())?;
        writeln!(writer, "Next rotation:   {}", self.next_rotation.to_rfc3339())?;
        writeln!(writer, "Created:         {}", self.created_at.to_rfc3339())?;
        if !self.tags.is_empty() {
            writeln!(writer)?;
            writeln!(writer, "Tags")?;
            for (k, v) in &self.tags {
                writeln!(writer, "  {k} = {v}")?;
            }
        }
        Ok(())
    }
}

/// Version history of one key.
#[derive(Debug, Clone, Serialize)]
pub struct VersionList {
    /// The key.
    pub key: String,
    /// Versions, oldest first.
    pub versions: Vec<VersionInfo>,
}

impl TableDisplay for VersionList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{:<10} {:<12} CREATED", "VERSION", "STATUS")?;
        for info in &self.versions {
            writeln!(
                writer,
                "{:<10} {:<12} {}",
                format!("v{}", info.version),
                info.status,
                info.created_at.to_rfc3339()
            )?;
        }
        Ok(())
    }
}

/// Rotation state of one key.
#[derive(Debug, Clone, Serialize)]
pub struct StateOutput {
    /// The key.
    pub key: String,
    /// Current state.
    pub state: RotationState,
}

impl TableDisplay for StateOutput {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}: {}", self.key, self.state)?;
        Ok(())
    }
}

/// Audit query results.
#[derive(Debug, Clone, Serialize)]
pub struct AuditList {
    /// Matching entries, oldest first.
    pub entries: Vec<AuditEntry>,
}

impl TableDisplay for AuditList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.entries.is_empty() {
            writeln!(writer, "No audit entries match.")?;
            return Ok(());
        }
        writeln!(
            writer,
            "{:<26} {:<20} {:<8} {:<16} KEY HASH",
            "TIME", "PRINCIPAL", "ACTION", "RESULT"
        )?;
        for entry in &self.entries {
            let hash = entry
                .key_hash
                .as_ref()
                .map_or("-", |h| h.as_str().get(..16).unwrap_or(h.as_str()));
            writeln!(
                writer,
                "{:<26} {:<20} {:<8} {:<16} {hash}",
                entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                entry.principal,
                entry.action,
                entry.result,
            )?;
        }
        Ok(())
    }
}
