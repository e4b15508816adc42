//! Resource measurement background worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::monitoring::Monitor;

/// Periodically measures every host with active workloads.
pub struct MonitorWorker {
    monitor: Arc<Monitor>,
    interval: Duration,
}

impl MonitorWorker {
    pub fn new(monitor: Arc<Monitor>, interval: Duration) -> Self {
        Self { monitor, interval }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting monitor worker");

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.monitor.measure_all().await {
                        Ok(hosts) => info!(hosts, "Host measurement complete"),
                        Err(e) => error!(error = %e, "Host measurement failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Monitor worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
