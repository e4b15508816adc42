//! Backup scheduler background worker.
//!
//! Runs due backups and prunes expired ones on an hourly tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::backup::BackupOrchestrator;
use crate::error::OrchestratorError;
use crate::store::RecordStore;

/// Counters from one scheduler tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub started: usize,
    pub failed: usize,
    pub pruned: usize,
}

pub struct BackupScheduler {
    store: Arc<dyn RecordStore>,
    backups: Arc<BackupOrchestrator>,
    interval: Duration,
}

impl BackupScheduler {
    pub fn new(store: Arc<dyn RecordStore>, backups: Arc<BackupOrchestrator>, interval: Duration) -> Self {
        Self {
            store,
            backups,
            interval,
        }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting backup scheduler");

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(stats) if stats.started > 0 || stats.pruned > 0 => {
                            info!(
                                started = stats.started,
                                failed = stats.failed,
                                pruned = stats.pruned,
                                "Backup tick complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Backup tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Backup scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run every backup due at `now`, then prune every enabled workload.
    ///
    /// Per-workload failures are logged and counted, never returned.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickStats, OrchestratorError> {
        let configs = self.store.list_backup_configs().await?;
        let mut stats = TickStats::default();

        for config in configs.iter().filter(|c| c.is_due(now)) {
            stats.started += 1;
            match self.backups.run_backup(config.workload_id).await {
                Ok(outcome) if outcome.success => {}
                Ok(outcome) => {
                    stats.failed += 1;
                    warn!(workload_id = %config.workload_id, error = ?outcome.error, "Scheduled backup failed");
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(workload_id = %config.workload_id, error = %e, "Scheduled backup not started");
                }
            }
        }

        for config in configs.iter().filter(|c| c.enabled) {
            match self.backups.prune(config.workload_id).await {
                Ok(report) => stats.pruned += report.removed.len(),
                Err(e) => warn!(workload_id = %config.workload_id, error = %e, "Pruning failed"),
            }
        }

        Ok(stats)
    }
}
