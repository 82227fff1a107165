//! Background rotation scheduler.
//!
//! Each tick scans for due keys, rotates them on a bounded worker pool
//! (parallel across keys, serialised per key by the rotation manager),
//! purges soft-deleted records past retention and drops idle lock slots.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::rotation::{RotationManager, RotationOutcome};

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between due scans.
    pub tick: Duration,
    /// Maximum rotations running at once.
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(3600),
            workers: 4,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Keys found due.
    pub due: usize,
    /// Rotations committed.
    pub rotated: usize,
    /// Rotations rolled back after validation failed.
    pub failed: usize,
    /// Rotations aborted by an error.
    pub errors: usize,
    /// Due keys that were no longer due once locked.
    pub skipped: usize,
    /// Soft-deleted records purged.
    pub purged: usize,
}

/// Runs rotations on a fixed tick.
#[derive(Debug)]
pub struct RotationScheduler {
    manager: Arc<RotationManager>,
    config: SchedulerConfig,
}

impl RotationScheduler {
    /// Creates a scheduler driving `manager`.
    #[must_use]
    pub fn new(manager: Arc<RotationManager>, config: SchedulerConfig) -> Self {
        Self { manager, config }
    }

    /// Runs one scan at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let due = self.manager.due_keys(now).await;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        let pool = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();
        for key in due {
            let Ok(permit) = Arc::clone(&pool).acquire_owned().await else {
                break;
            };
            let manager = Arc::clone(&self.manager);
            tasks.spawn(async move {
                let _permit = permit;
                manager.rotate_if_due(&key, now).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(RotationOutcome::Rotated { .. }))) => report.rotated += 1,
                Ok(Ok(Some(RotationOutcome::Failed { .. }))) => report.failed += 1,
                Ok(Ok(None)) => report.skipped += 1,
                Ok(Err(err)) => {
                    warn!(error = %err, "scheduled rotation aborted");
                    report.errors += 1;
                }
                Err(err) => {
                    error!(error = %err, "rotation task panicked");
                    report.errors += 1;
                }
            }
        }

        for routed in self.manager.router().backends() {
            match routed.backend().purge_deleted(now).await {
                Ok(n) => report.purged += n,
                Err(err) => warn!(backend = routed.id(), error = %err, "purge failed"),
            }
        }

        let pruned = self.manager.prune_locks();
        debug!(pruned, "idle lock slots dropped");
        report
    }

    /// Ticks until `shutdown` fires. The first tick runs immediately.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_secs = self.config.tick.as_secs(),
            workers = self.config.workers,
            "Starting rotation scheduler"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick(Utc::now()).await;
                    info!(
                        due = report.due,
                        rotated = report.rotated,
                        failed = report.failed,
                        errors = report.errors,
                        skipped = report.skipped,
                        purged = report.purged,
                        "rotation tick complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Rotation scheduler shutting down");
                    break;
                }
            }
        }
    }
}
