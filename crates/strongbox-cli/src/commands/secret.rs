//! One-shot secret operations.
//!
//! Each invocation performs a single service call as the configured
//! principal, so every run leaves exactly one audit entry.

use std::io::{Read, Write};
use std::path::Path;

use strongbox_audit::{AuditFilter, AuditResult};
use strongbox_secrets::{
    Caller, Classification, SecretAttributes, SecretKey, SecretService, SecretValue, Version,
};

use crate::cli::{AuditArgs, Commands, SetArgs};
use crate::error::CliError;
use crate::output::{AuditList, KeyList, OutputFormat, StateOutput, ValueOutput, VersionList, WriteOutput};

/// Handler for secret subcommands.
pub struct SecretCommand<'a> {
    service: &'a SecretService,
    caller: &'a Caller,
}

impl<'a> SecretCommand<'a> {
    /// Creates a handler acting as `caller`.
    #[must_use]
    pub const fn new(service: &'a SecretService, caller: &'a Caller) -> Self {
        Self { service, caller }
    }

    /// Executes one subcommand.
    ///
    /// # Errors
    ///
    /// Returns the service error, or an argument or output error.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        command: &Commands,
    ) -> Result<(), CliError> {
        match command {
            Commands::Get { key, version } => {
                let key = parse_key(key)?;
                let value = self
                    .service
                    .get(self.caller, &key, version.map(Version::new))
                    .await?;
                format.write(
                    out,
                    &ValueOutput {
                        key: key.to_string(),
                        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    },
                )
            }
            Commands::Set(args) => self.set(out, format, args).await,
            Commands::Delete { key } => {
                let key = parse_key(key)?;
                self.service.delete(self.caller, &key).await?;
                format.write(
                    out,
                    &WriteOutput {
                        message: format!("deleted {key}"),
                        key: key.to_string(),
                        operation: "deleted",
                        version: None,
                    },
                )
            }
            Commands::List => {
                let keys = self.service.list(self.caller).await?;
                format.write(out, &KeyList { keys })
            }
            Commands::Rotate { key } => {
                let key = parse_key(key)?;
                let outcome = self.service.rotate_detailed(self.caller, &key).await?;
                format.write(out, &WriteOutput::from_rotation(&key, &outcome))?;
                if outcome.is_rotated() {
                    Ok(())
                } else {
                    Err(strongbox_secrets::Error::Validation {
                        reason: "rotation rolled back".to_string(),
                    }
                    .into())
                }
            }
            Commands::Metadata { key } => {
                let key = parse_key(key)?;
                let metadata = self.service.get_metadata(self.caller, &key).await?;
                format.write(out, &metadata)
            }
            Commands::Versions { key } => {
                let key = parse_key(key)?;
                let versions = self.service.versions(self.caller, &key).await?;
                format.write(
                    out,
                    &VersionList {
                        key: key.to_string(),
                        versions,
                    },
                )
            }
            Commands::State { key } => {
                let key = parse_key(key)?;
                let state = self.service.rotation_state(self.caller, &key).await?;
                format.write(
                    out,
                    &StateOutput {
                        key: key.to_string(),
                        state,
                    },
                )
            }
            Commands::Audit(args) => self.audit(out, format, args),
            Commands::Serve(_) => Err(CliError::InvalidArgument(
                "serve is not a one-shot command".to_string(),
            )),
        }
    }

    async fn set<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &SetArgs,
    ) -> Result<(), CliError> {
        let key = parse_key(&args.key)?;
        let value = read_value(args.value.as_deref(), args.file.as_deref())?;
        let attributes = attributes(args)?;

        let version = match args.expect_version {
            Some(_) if attributes.is_some() => {
                return Err(CliError::InvalidArgument(
                    "--expect-version cannot be combined with metadata flags".to_string(),
                ));
            }
            Some(expected) => {
                self.service
                    .compare_and_set(self.caller, &key, value, Version::new(expected))
                    .await?
            }
            None => self.service.set(self.caller, &key, value, attributes).await?,
        };

        format.write(
            out,
            &WriteOutput {
                message: format!("wrote {key} v{version}"),
                key: key.to_string(),
                operation: "written",
                version: Some(version),
            },
        )
    }

    fn audit<W: Write>(&self, out: &mut W, format: &OutputFormat, args: &AuditArgs) -> Result<(), CliError> {
        let mut filter = AuditFilter::new().limit(args.limit);
        if let Some(key) = &args.key {
            filter = filter.for_key_hash(self.service.key_hash(&parse_key(key)?));
        }
        if let Some(principal) = &args.by_principal {
            filter = filter.by_principal(principal.clone());
        }
        if let Some(result) = &args.result {
            filter = filter.with_result(parse_result(result)?);
        }

        let entries = self.service.query_audit(&filter)?;
        format.write(out, &AuditList { entries })
    }
}

fn parse_key(raw: &str) -> Result<SecretKey, CliError> {
    Ok(SecretKey::new(raw)?)
}

fn parse_result(raw: &str) -> Result<AuditResult, CliError> {
    [
        AuditResult::Granted,
        AuditResult::Denied,
        AuditResult::Rotated,
        AuditResult::RotationFailed,
    ]
    .into_iter()
    .find(|r| r.as_str() == raw)
    .ok_or_else(|| CliError::InvalidArgument(format!("unknown audit result '{raw}'")))
}

fn read_value(value: Option<&str>, file: Option<&Path>) -> Result<SecretValue, CliError> {
    let bytes = match (value, file) {
        (Some(v), _) => v.as_bytes().to_vec(),
        (None, Some(path)) => std::fs::read(path)?,
        (None, None) => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    // A trailing newline from `echo` or an editor is not part of the secret.
    let trimmed = bytes.strip_suffix(b"\n").unwrap_or(&bytes);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(CliError::InvalidArgument("secret value is empty".to_string()));
    }
    Ok(SecretValue::new(trimmed.to_vec()))
}

fn attributes(args: &SetArgs) -> Result<Option<SecretAttributes>, CliError> {
    if args.classification.is_none() && args.rotation_days.is_none() && args.tag.is_empty() {
        return Ok(None);
    }

    let mut attrs = SecretAttributes::new();
    if let Some(raw) = &args.classification {
        attrs = attrs.with_classification(raw.parse::<Classification>()?);
    }
    if let Some(days) = args.rotation_days {
        if days == 0 {
            return Err(CliError::InvalidArgument("rotation-days must be at least 1".to_string()));
        }
        attrs = attrs.with_rotation_days(days);
    }
    for tag in &args.tag {
        let (k, v) = tag
            .split_once('=')
            .ok_or_else(|| CliError::InvalidArgument(format!("tag '{tag}' must be KEY=VALUE")))?;
        attrs = attrs.with_tag(k, v);
    }
    Ok(Some(attrs))
}
