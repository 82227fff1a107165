//! Long-running daemon: rotation scheduler, policy hot reload and metrics
//! export, all stopped together on Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use strongbox_policy::{FilePolicySource, PolicyEngine};
use strongbox_secrets::{Metrics, RotationScheduler, SecretService, StrongboxConfig};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::cli::ServeArgs;
use crate::error::CliError;

/// Handler for `serve`.
pub struct ServeCommand<'a> {
    service: &'a SecretService,
    config: &'a StrongboxConfig,
}

impl<'a> ServeCommand<'a> {
    /// Creates a handler for a configured service.
    #[must_use]
    pub const fn new(service: &'a SecretService, config: &'a StrongboxConfig) -> Self {
        Self { service, config }
    }

    /// Runs until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the interrupt handler cannot be installed.
    pub async fn execute(&self, args: &ServeArgs) -> Result<(), CliError> {
        let (shutdown_tx, _) = broadcast::channel::<()>(4);
        let mut tasks = JoinSet::new();

        let scheduler_config = self.config.scheduler_config();
        let tick = scheduler_config.tick;
        let scheduler = RotationScheduler::new(Arc::clone(self.service.rotation()), scheduler_config);
        let rx = shutdown_tx.subscribe();
        tasks.spawn(async move { scheduler.run(rx).await });

        match (self.config.policy_source(), self.config.policy_reload_interval()) {
            (Some(source), Some(every)) => {
                let engine = Arc::clone(self.service.policy());
                let rx = shutdown_tx.subscribe();
                tasks.spawn(reload_policies(engine, source, every, rx));
            }
            (Some(_), None) => debug!("policy reload disabled"),
            (None, _) => warn!("no policy file configured, every request will be denied"),
        }

        if let Some(path) = args.metrics_file.clone() {
            let metrics = self.service.metrics().clone();
            let rx = shutdown_tx.subscribe();
            tasks.spawn(export_metrics(metrics, path, tick, rx));
        }

        info!("strongbox running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        info!("shutdown requested");
        let _ = shutdown_tx.send(());

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        Ok(())
    }
}

async fn reload_policies(
    engine: Arc<PolicyEngine>,
    source: FilePolicySource,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately and the set was loaded at startup.
    ticker.tick().await;

    info!(reload_secs = every.as_secs(), "Starting policy reloader");
    loop {
        tokio::select! {
            _ = ticker.tick() => match engine.reload(&source) {
                Ok(count) => debug!(policies = count, "policies reloaded"),
                Err(err) => warn!(error = %err, "policy reload failed, keeping current set"),
            },
            _ = shutdown.recv() => {
                info!("Policy reloader shutting down");
                break;
            }
        }
    }
}

async fn export_metrics(
    metrics: Metrics,
    path: PathBuf,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => write_metrics(&metrics, &path).await,
            _ = shutdown.recv() => {
                write_metrics(&metrics, &path).await;
                break;
            }
        }
    }
}

async fn write_metrics(metrics: &Metrics, path: &Path) {
    let staging = path.with_extension("tmp");
    let result = async {
        tokio::fs::write(&staging, metrics.encode()).await?;
        tokio::fs::rename(&staging, path).await
    }
    .await;
    if let Err(err) = result {
        warn!(path = %path.display(), error = %err, "failed to export metrics");
    }
}
