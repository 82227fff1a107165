//! Strongbox CLI binary entrypoint.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use strongbox_policy::RequestContext;
use strongbox_secrets::{Caller, Metrics, StrongboxConfig, TracingNotifier};
use tracing_subscriber::EnvFilter;

use strongbox_cli::cli::{Cli, Commands, LogFormat};
use strongbox_cli::commands::{SecretCommand, ServeCommand};
use strongbox_cli::{CliError, OutputFormat};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(e.downcast_ref::<CliError>().map_or(1, CliError::exit_code))
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = StrongboxConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let master = config.master_key()?;
    let metrics = Metrics::new();
    let service = config
        .service_builder(&master, &metrics)?
        .notifier(Arc::new(TracingNotifier))
        .build();
    let format = OutputFormat::new(cli.format);

    match &cli.command {
        Commands::Serve(args) => ServeCommand::new(&service, &config).execute(args).await?,
        command => {
            let caller = caller(&cli)?;
            let mut stdout = io::stdout().lock();
            SecretCommand::new(&service, &caller)
                .execute(&mut stdout, &format, command)
                .await?;
        }
    }
    Ok(())
}

fn caller(cli: &Cli) -> Result<Caller, CliError> {
    if cli.principal.is_empty() {
        return Err(CliError::InvalidArgument(
            "--principal (or STRONGBOX_PRINCIPAL) is required".to_string(),
        ));
    }
    if cli.principal.starts_with("system:") {
        return Err(CliError::InvalidArgument(format!(
            "principal '{}' is reserved",
            cli.principal
        )));
    }

    let mut context = RequestContext::now();
    if let Some(ip) = cli.source_ip {
        context = context.with_source_ip(ip);
    }
    if let Some(environment) = &cli.environment {
        context = context.with_environment(environment.clone());
    }
    if let Some(service) = &cli.service {
        context = context.with_service(service.clone());
    }
    Ok(Caller::new(cli.principal.clone()).with_context(context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_requires_principal() {
        let cli = Cli::parse_from(["strongbox", "list"]);
        assert!(matches!(caller(&cli), Err(CliError::InvalidArgument(_))));
    }

    #[test]
    fn caller_rejects_reserved_principal() {
        let cli = Cli::parse_from(["strongbox", "-p", "system:scheduler", "list"]);
        assert!(caller(&cli).is_err());
    }

    #[test]
    fn caller_carries_context() {
        let cli = Cli::parse_from([
            "strongbox",
            "-p",
            "service-a",
            "--source-ip",
            "10.0.0.7",
            "--environment",
            "production",
            "list",
        ]);
        let caller = caller(&cli).expect("caller");
        assert_eq!(caller.principal, "service-a");
        assert_eq!(caller.context.source_ip, Some("10.0.0.7".parse().expect("ip")));
        assert_eq!(caller.context.environment.as_deref(), Some("production"));
        assert!(caller.context.service.is_none());
    }

    #[tokio::test]
    async fn run_with_missing_config_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.json");
        let cli = Cli::parse_from([
            "strongbox",
            "-c",
            missing.to_str().expect("utf8 path"),
            "-p",
            "admin",
            "list",
        ]);
        let err = run(cli).await.expect_err("missing config");
        assert!(format!("{err:#}").contains("absent.json"));
    }
}
