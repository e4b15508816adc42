//! Resource measurement and health checks for deployed workloads.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use appz_id::{HostId, WorkloadId};
use appz_remote::{Connector, RemoteClient, RemoteSession, DEFAULT_TIMEOUT};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::capacity::{refresh_host_usage, round_to};
use crate::deploy::stats::{disk_usage_command, parse_disk_usage_mb, parse_stats, stats_command, WorkloadStats};
use crate::deploy::DeploySettings;
use crate::error::{OperationOutcome, OrchestratorError};
use crate::locks::HostLocks;
use crate::model::{Footprint, Workload, WorkloadStatus};
use crate::store::RecordStore;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostMeasurement {
    pub host_id: HostId,
    pub measured: usize,
    pub failed: usize,
    pub capacity_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub workload_id: WorkloadId,
    pub url: String,
    pub healthy: bool,
    pub status_code: Option<u16>,
}

pub struct Monitor {
    store: Arc<dyn RecordStore>,
    connector: Arc<dyn Connector>,
    locks: Arc<HostLocks>,
    settings: DeploySettings,
    http: reqwest::Client,
    scheme: String,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        connector: Arc<dyn Connector>,
        locks: Arc<HostLocks>,
        settings: DeploySettings,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(HEALTH_TIMEOUT).build()?;
        Ok(Self {
            store,
            connector,
            locks,
            settings,
            http,
            scheme: "https".to_string(),
        })
    }

    /// Check health over another scheme, e.g. plain `http` in tests.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Measure every Active workload on a host and refresh its usage.
    ///
    /// A workload whose measurement fails keeps its previous footprint.
    #[instrument(skip(self), fields(host_id = %host_id))]
    pub async fn measure_host(&self, host_id: HostId) -> Result<OperationOutcome<HostMeasurement>, OrchestratorError> {
        let host = self.store.get_host(host_id).await?;
        let _guard = self.locks.lock(host_id).await;

        let workloads: Vec<Workload> = self
            .store
            .list_workloads_on_host(host_id)
            .await?
            .into_iter()
            .filter(|w| w.status == WorkloadStatus::Active)
            .collect();

        let client = RemoteClient::new(Arc::clone(&self.connector));
        let target = host.target(&self.settings.ssh_user, self.settings.ssh_key.as_ref());
        let session = match client.session(&target).await {
            Ok(session) => session,
            Err(e) => {
                let err = OrchestratorError::from(e);
                warn!(error = %err, "Cannot reach host for measurement");
                return Ok(OperationOutcome::failed(&err));
            }
        };

        let mut measured = 0;
        let mut failed = 0;
        for mut workload in workloads {
            match self.measure_workload(session.as_ref(), &workload).await {
                Ok(footprint) => {
                    debug!(workload_id = %workload.id, ram_mb = footprint.ram_mb, "Measured workload");
                    workload.measured_cpu_percent = Some(footprint.cpu_cores * 100.0);
                    workload.measured = Some(footprint);
                    self.store.save_workload(&workload).await?;
                    measured += 1;
                }
                Err(e) => {
                    warn!(workload_id = %workload.id, error = %e, "Measurement failed");
                    failed += 1;
                }
            }
        }
        client.close().await;

        let mut host = refresh_host_usage(self.store.as_ref(), host_id).await?;
        host.last_health_check = Some(Utc::now());
        self.store.save_host(&host).await?;

        info!(measured, failed, capacity_percent = host.capacity_percent, "Host measured");
        Ok(OperationOutcome::ok(HostMeasurement {
            host_id,
            measured,
            failed,
            capacity_percent: host.capacity_percent,
        }))
    }

    async fn measure_workload(
        &self,
        session: &dyn RemoteSession,
        workload: &Workload,
    ) -> Result<Footprint, OrchestratorError> {
        let stats_cmd = stats_command(&workload.id.slug());
        let output = session.exec(&stats_cmd, DEFAULT_TIMEOUT).await?;
        if !output.success() {
            return Err(OrchestratorError::command_failure(stats_cmd, &output));
        }
        let containers = parse_stats(&output.stdout);
        if containers.is_empty() {
            return Err(OrchestratorError::InvalidState(format!(
                "no running containers for {}",
                workload.id.slug()
            )));
        }
        let stats = WorkloadStats::from_containers(containers);

        let dir = self.settings.layout.workload_dir(workload.id);
        let du = session.exec(&disk_usage_command(&dir), DEFAULT_TIMEOUT).await?;
        let storage_gb = parse_disk_usage_mb(&du.stdout)
            .map(|mb| round_to(mb / 1024.0, 2))
            .or_else(|| workload.measured.map(|m| m.storage_gb))
            .unwrap_or(0.0);

        Ok(Footprint::new(stats.memory_mb.round(), round_to(stats.cpu_cores(), 3), storage_gb))
    }

    /// Measure every host that has Active workloads. Returns hosts measured.
    pub async fn measure_all(&self) -> Result<usize, OrchestratorError> {
        let hosts: BTreeSet<HostId> = self
            .store
            .list_workloads()
            .await?
            .into_iter()
            .filter(|w| w.status == WorkloadStatus::Active)
            .filter_map(|w| w.host_id)
            .collect();

        let mut count = 0;
        for host_id in hosts {
            match self.measure_host(host_id).await {
                Ok(outcome) if outcome.success => count += 1,
                Ok(outcome) => {
                    warn!(host_id = %host_id, error = ?outcome.error, "Host measurement failed");
                }
                Err(e) => warn!(host_id = %host_id, error = %e, "Host measurement failed"),
            }
        }
        Ok(count)
    }

    /// Request the workload's health path. Any status below 400 is healthy;
    /// transport errors are unhealthy.
    pub async fn check_health(&self, workload_id: WorkloadId) -> Result<HealthReport, OrchestratorError> {
        let workload = self.store.get_workload(workload_id).await?;
        let template = self.store.get_template(workload.template_id).await?;
        let path = if template.healthcheck_path.starts_with('/') {
            template.healthcheck_path.clone()
        } else {
            format!("/{}", template.healthcheck_path)
        };
        let url = format!("{}://{}{}", self.scheme, workload.domain, path);

        let status_code = match self.http.get(&url).send().await {
            Ok(response) => Some(response.status().as_u16()),
            Err(e) => {
                debug!(workload_id = %workload_id, url = %url, error = %e, "Health check failed");
                None
            }
        };

        Ok(HealthReport {
            workload_id,
            healthy: status_code.is_some_and(|code| code < 400),
            url,
            status_code,
        })
    }
}
