use std::sync::Arc;
use std::time::Duration;

use appz_id::{HostId, WorkloadId};
use appz_remote::{
    shell_quote, Connector, RemoteClient, RemoteSession, DEFAULT_TIMEOUT, INSTALL_TIMEOUT,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::builtin::{resolve_topology, HOST_SETUP_COMMANDS, PROXY_TOPOLOGY};
use super::observability::{self, COLLECTOR_SERVICE};
use super::render::{render, Placeholders};
use super::stats::{parse_stats, stats_command, WorkloadStats};
use super::topology::Topology;
use super::{normalize_domain, proxy, run_checked, DeploySettings, RemoteLayout};
use crate::capacity::{refresh_host_usage, reserve_host};
use crate::error::{OperationOutcome, OrchestratorError};
use crate::locks::HostLocks;
use crate::model::{BackupConfig, Host, Observability, Template, Workload, WorkloadStatus};
use crate::secrets::{Credentials, MasterKey};
use crate::store::RecordStore;

const MAX_LOG_LINES: u32 = 10_000;

/// Result of a successful deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployReport {
    pub host_id: HostId,
    pub domain: String,
    pub services: Vec<String>,
}

/// A lifecycle command and the state it leads to.
struct Transition {
    op: &'static str,
    allowed: &'static [WorkloadStatus],
    next: Option<WorkloadStatus>,
    /// Mark the workload `Error` when a command fails. Otherwise the record is left as it was.
    error_on_failure: bool,
    regenerate_proxy: bool,
}

/// Deploys workloads and drives their lifecycle on remote hosts.
///
/// Every operation opens its own [`RemoteClient`] and closes it before
/// returning. Mutations of a host happen under that host's lock.
pub struct DeployOrchestrator {
    store: Arc<dyn RecordStore>,
    connector: Arc<dyn Connector>,
    locks: Arc<HostLocks>,
    master_key: Arc<MasterKey>,
    settings: DeploySettings,
    /// Bucket for backup configurations created on deploy.
    backup_bucket: Option<String>,
}

impl DeployOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        connector: Arc<dyn Connector>,
        locks: Arc<HostLocks>,
        master_key: Arc<MasterKey>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            store,
            connector,
            locks,
            master_key,
            settings,
            backup_bucket: None,
        }
    }

    /// Create a default backup configuration for workloads deployed with
    /// `backup_enabled`, stored in `bucket`.
    pub fn with_backup_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.backup_bucket = Some(bucket.into());
        self
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    fn layout(&self) -> &RemoteLayout {
        &self.settings.layout
    }

    fn client(&self) -> RemoteClient {
        RemoteClient::new(Arc::clone(&self.connector))
    }

    async fn session(
        &self,
        client: &RemoteClient,
        host: &Host,
    ) -> Result<Arc<dyn RemoteSession>, OrchestratorError> {
        let target = host.target(&self.settings.ssh_user, self.settings.ssh_key.as_ref());
        Ok(client.session(&target).await?)
    }

    /// Install Docker, create the shared network and start the proxy.
    #[instrument(skip(self), fields(host_id = %host_id))]
    pub async fn setup_host(&self, host_id: HostId) -> Result<OperationOutcome<()>, OrchestratorError> {
        let host = self.store.get_host(host_id).await?;
        let _guard = self.locks.lock(host_id).await;

        let client = self.client();
        let result = self.setup_host_inner(&client, &host).await;
        client.close().await;

        match result {
            Ok(()) => {
                info!("Host setup complete");
                Ok(OperationOutcome::ok(()))
            }
            Err(e) => {
                warn!(error = %e, "Host setup failed");
                Ok(OperationOutcome::failed(&e))
            }
        }
    }

    async fn setup_host_inner(&self, client: &RemoteClient, host: &Host) -> Result<(), OrchestratorError> {
        let session = self.session(client, host).await?;

        for command in HOST_SETUP_COMMANDS {
            let output = session.exec(command, INSTALL_TIMEOUT).await?;
            if !output.success() && !output.stderr.contains("already exists") {
                return Err(OrchestratorError::command_failure(*command, &output));
            }
        }

        let proxy_dir = self.layout().proxy_dir();
        run_checked(session.as_ref(), &format!("mkdir -p {}", shell_quote(&proxy_dir)), DEFAULT_TIMEOUT).await?;

        let compose = render(
            "proxy",
            PROXY_TOPOLOGY,
            &Placeholders::new().with("PROXY_PATH", proxy_dir.clone()),
        )?;
        session
            .upload_content(compose.as_bytes(), &format!("{proxy_dir}/docker-compose.yml"))
            .await?;
        proxy::write_caddyfile(session.as_ref(), self.store.as_ref(), self.layout(), host.id, None).await?;

        run_checked(
            session.as_ref(),
            &format!("cd {} && docker compose up -d", shell_quote(&proxy_dir)),
            INSTALL_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    /// Place, render and start a workload.
    ///
    /// Validation and placement failures are returned as `Err` and leave
    /// the record untouched. Once the workload is `Provisioning`, any
    /// failure marks it `Error` and comes back as a failed outcome. Nothing
    /// already created on the host is rolled back.
    ///
    /// After a successful deploy the opt-in add-ons run with the host lock
    /// released: a default backup configuration when `backup_enabled` and
    /// the collector when `observability_enabled`. Their failures are
    /// logged and do not fail the deploy.
    #[instrument(skip(self), fields(workload_id = %workload_id))]
    pub async fn deploy(&self, workload_id: WorkloadId) -> Result<OperationOutcome<DeployReport>, OrchestratorError> {
        let mut workload = self.store.get_workload(workload_id).await?;
        if !matches!(workload.status, WorkloadStatus::Pending | WorkloadStatus::Error) {
            return Err(OrchestratorError::InvalidState(format!(
                "cannot deploy a workload in status {}",
                workload.status.as_str()
            )));
        }
        workload.domain = normalize_domain(&workload.domain)?;
        let template = self.store.get_template(workload.template_id).await?;
        let topology_text = resolve_topology(&template)?.to_string();

        let (host, guard) = reserve_host(self.store.as_ref(), &self.locks, &mut workload, &template).await?;

        let client = self.client();
        let result = self
            .deploy_on_host(&client, &host, &mut workload, &template, &topology_text)
            .await;
        client.close().await;

        match result {
            Ok(rendered) => {
                let services = Topology::parse(&rendered).map(|t| t.services()).unwrap_or_default();
                workload.status = WorkloadStatus::Active;
                workload.rendered_topology = Some(rendered);
                workload.deployed_at = Some(Utc::now());
                workload.last_error = None;
                workload.error_at = None;
                self.store.save_workload(&workload).await?;
                refresh_host_usage(self.store.as_ref(), host.id).await?;
                drop(guard);

                info!(host_id = %host.id, domain = %workload.domain, "Deployed workload");
                self.enable_addons(&workload).await;
                Ok(OperationOutcome::ok(DeployReport {
                    host_id: host.id,
                    domain: workload.domain.clone(),
                    services,
                }))
            }
            Err(e) => {
                warn!(host_id = %host.id, error = %e, "Deployment failed");
                workload.mark_error(e.to_string());
                self.store.save_workload(&workload).await?;
                refresh_host_usage(self.store.as_ref(), host.id).await?;
                Ok(OperationOutcome::failed(&e))
            }
        }
    }

    async fn enable_addons(&self, workload: &Workload) {
        if workload.backup_enabled {
            if let Err(e) = self.ensure_backup_config(workload).await {
                warn!(error = %e, "Creating backup configuration failed");
            }
        }
        if workload.observability_enabled {
            match self.enable_observability(workload.id).await {
                Ok(outcome) if outcome.success => {}
                Ok(outcome) => warn!(error = ?outcome.error, "Enabling observability after deploy failed"),
                Err(e) => warn!(error = %e, "Enabling observability after deploy failed"),
            }
        }
    }

    async fn ensure_backup_config(&self, workload: &Workload) -> Result<(), OrchestratorError> {
        let Some(bucket) = &self.backup_bucket else {
            return Err(OrchestratorError::ConfigurationMissing("backup bucket".to_string()));
        };
        if self.store.backup_config_for_workload(workload.id).await?.is_none() {
            let config = BackupConfig::default_for(workload.id, bucket.clone());
            self.store.save_backup_config(&config).await?;
            info!(config_id = %config.id, "Created default backup configuration");
        }
        Ok(())
    }

    async fn deploy_on_host(
        &self,
        client: &RemoteClient,
        host: &Host,
        workload: &mut Workload,
        template: &Template,
        topology_text: &str,
    ) -> Result<String, OrchestratorError> {
        let aad = workload.credentials_aad();
        // A retry reuses the secrets the data volumes were initialised with.
        let credentials = match &workload.credentials {
            Some(sealed) => Credentials::open(&self.master_key, sealed, &aad)?,
            None => {
                let fresh = Credentials::generate();
                workload.credentials = Some(fresh.seal(&self.master_key, &aad)?);
                self.store.save_workload(workload).await?;
                fresh
            }
        };

        let dir = self.layout().workload_dir(workload.id);
        let rendered = render(
            template.name.as_str(),
            topology_text,
            &Placeholders::for_workload(workload, template, &credentials, &dir),
        )?;

        let session = self.session(client, host).await?;
        run_checked(session.as_ref(), &format!("mkdir -p {}", shell_quote(&dir)), DEFAULT_TIMEOUT).await?;
        session
            .upload_content(rendered.as_bytes(), &self.layout().compose_path(workload.id))
            .await?;
        run_checked(
            session.as_ref(),
            &format!("cd {} && docker compose up -d", shell_quote(&dir)),
            INSTALL_TIMEOUT,
        )
        .await?;

        proxy::regenerate(session.as_ref(), self.store.as_ref(), self.layout(), host.id, Some(&*workload)).await?;
        Ok(rendered)
    }

    /// Bring a suspended workload back up.
    #[instrument(skip(self), fields(workload_id = %workload_id))]
    pub async fn start(&self, workload_id: WorkloadId) -> Result<OperationOutcome<WorkloadStatus>, OrchestratorError> {
        self.transition(
            workload_id,
            Transition {
                op: "start",
                allowed: &[WorkloadStatus::Suspended],
                next: Some(WorkloadStatus::Active),
                error_on_failure: true,
                regenerate_proxy: true,
            },
            |dir| vec![(format!("cd {dir} && docker compose up -d"), INSTALL_TIMEOUT)],
        )
        .await
    }

    /// Stop the containers and suspend the workload. Data is kept.
    #[instrument(skip(self), fields(workload_id = %workload_id))]
    pub async fn stop(&self, workload_id: WorkloadId) -> Result<OperationOutcome<WorkloadStatus>, OrchestratorError> {
        self.transition(
            workload_id,
            Transition {
                op: "stop",
                allowed: &[WorkloadStatus::Active],
                next: Some(WorkloadStatus::Suspended),
                error_on_failure: false,
                regenerate_proxy: true,
            },
            |dir| vec![(format!("cd {dir} && docker compose down"), DEFAULT_TIMEOUT)],
        )
        .await
    }

    #[instrument(skip(self), fields(workload_id = %workload_id))]
    pub async fn restart(&self, workload_id: WorkloadId) -> Result<OperationOutcome<WorkloadStatus>, OrchestratorError> {
        self.transition(
            workload_id,
            Transition {
                op: "restart",
                allowed: &[WorkloadStatus::Active],
                next: None,
                error_on_failure: false,
                regenerate_proxy: false,
            },
            |dir| vec![(format!("cd {dir} && docker compose restart"), INSTALL_TIMEOUT)],
        )
        .await
    }

    /// Tear down containers, volumes and the workload directory.
    #[instrument(skip(self), fields(workload_id = %workload_id))]
    pub async fn remove(&self, workload_id: WorkloadId) -> Result<OperationOutcome<WorkloadStatus>, OrchestratorError> {
        self.transition(
            workload_id,
            Transition {
                op: "remove",
                allowed: &[WorkloadStatus::Active, WorkloadStatus::Suspended, WorkloadStatus::Error],
                next: Some(WorkloadStatus::Removed),
                error_on_failure: false,
                regenerate_proxy: true,
            },
            |dir| {
                vec![
                    (
                        format!("[ ! -d {dir} ] || (cd {dir} && docker compose down -v)"),
                        INSTALL_TIMEOUT,
                    ),
                    (format!("rm -rf {dir}"), DEFAULT_TIMEOUT),
                ]
            },
        )
        .await
    }

    async fn transition(
        &self,
        workload_id: WorkloadId,
        transition: Transition,
        commands: impl FnOnce(&str) -> Vec<(String, Duration)>,
    ) -> Result<OperationOutcome<WorkloadStatus>, OrchestratorError> {
        let host_id = assigned_host(&self.store.get_workload(workload_id).await?)?;
        let _guard = self.locks.lock(host_id).await;

        // Re-read under the lock.
        let mut workload = self.store.get_workload(workload_id).await?;
        if !transition.allowed.contains(&workload.status) {
            return Err(OrchestratorError::InvalidState(format!(
                "cannot {} a workload in status {}",
                transition.op,
                workload.status.as_str()
            )));
        }
        let host = self.store.get_host(host_id).await?;
        let commands = commands(&shell_quote(&self.layout().workload_dir(workload_id)));

        let client = self.client();
        let result = async {
            let session = self.session(&client, &host).await?;
            for (command, timeout) in &commands {
                run_checked(session.as_ref(), command, *timeout).await?;
            }
            Ok::<_, OrchestratorError>(session)
        }
        .await;

        let outcome = match result {
            Ok(session) => {
                if let Some(next) = transition.next {
                    workload.status = next;
                    if next == WorkloadStatus::Active {
                        workload.last_error = None;
                        workload.error_at = None;
                    }
                    self.store.save_workload(&workload).await?;
                    refresh_host_usage(self.store.as_ref(), host_id).await?;
                }
                if transition.regenerate_proxy {
                    if let Err(e) =
                        proxy::regenerate(session.as_ref(), self.store.as_ref(), self.layout(), host_id, None).await
                    {
                        warn!(host_id = %host_id, error = %e, "Proxy update failed after {}", transition.op);
                    }
                }
                info!(host_id = %host_id, status = workload.status.as_str(), "Workload {} complete", transition.op);
                OperationOutcome::ok(workload.status)
            }
            Err(e) => {
                warn!(host_id = %host_id, error = %e, "Workload {} failed", transition.op);
                if transition.error_on_failure {
                    workload.mark_error(e.to_string());
                    self.store.save_workload(&workload).await?;
                    refresh_host_usage(self.store.as_ref(), host_id).await?;
                }
                OperationOutcome::failed(&e)
            }
        };
        client.close().await;
        Ok(outcome)
    }

    /// Last `lines` lines of the workload's container logs.
    pub async fn logs(&self, workload_id: WorkloadId, lines: u32) -> Result<String, OrchestratorError> {
        let (workload, host) = self.assigned(workload_id).await?;
        let dir = shell_quote(&self.layout().workload_dir(workload.id));
        let command = format!(
            "cd {dir} && docker compose logs --no-color --tail {}",
            lines.clamp(1, MAX_LOG_LINES)
        );

        let client = self.client();
        let result = async {
            let session = self.session(&client, &host).await?;
            run_checked(session.as_ref(), &command, DEFAULT_TIMEOUT).await
        }
        .await;
        client.close().await;
        Ok(result?.stdout)
    }

    /// Current memory and CPU usage of the workload's containers.
    pub async fn stats(&self, workload_id: WorkloadId) -> Result<WorkloadStats, OrchestratorError> {
        let (workload, host) = self.assigned(workload_id).await?;
        let command = stats_command(&workload.id.slug());

        let client = self.client();
        let result = async {
            let session = self.session(&client, &host).await?;
            run_checked(session.as_ref(), &command, DEFAULT_TIMEOUT).await
        }
        .await;
        client.close().await;
        Ok(WorkloadStats::from_containers(parse_stats(&result?.stdout)))
    }

    /// Attach a telemetry collector to an Active workload.
    #[instrument(skip(self), fields(workload_id = %workload_id))]
    pub async fn enable_observability(
        &self,
        workload_id: WorkloadId,
    ) -> Result<OperationOutcome<Observability>, OrchestratorError> {
        let host_id = assigned_host(&self.store.get_workload(workload_id).await?)?;
        let _guard = self.locks.lock(host_id).await;

        let mut workload = self.store.get_workload(workload_id).await?;
        if workload.status != WorkloadStatus::Active {
            return Err(OrchestratorError::InvalidState(format!(
                "observability needs an active workload, not {}",
                workload.status.as_str()
            )));
        }
        let mut topology = Topology::parse(workload.rendered_topology.as_deref().ok_or_else(|| {
            OrchestratorError::ConfigurationMissing(format!("workload {workload_id} has no rendered topology"))
        })?)?;
        let host = self.store.get_host(host_id).await?;

        let tenant_id = observability::tenant_id(&workload.customer);
        let dir = self.layout().workload_dir(workload_id);
        let config = observability::collector_config(&workload, &tenant_id, &self.settings.otel_endpoint)?;
        let added = topology.add_service(COLLECTOR_SERVICE, observability::collector_service(&workload, &dir)?)?;
        let compose = topology.render()?;

        let client = self.client();
        let result = async {
            let session = self.session(&client, &host).await?;
            session
                .upload_content(config.as_bytes(), &self.layout().otel_config_path(workload_id))
                .await?;
            if added {
                session
                    .upload_content(compose.as_bytes(), &self.layout().compose_path(workload_id))
                    .await?;
            }
            run_checked(
                session.as_ref(),
                &format!("cd {} && docker compose up -d {COLLECTOR_SERVICE}", shell_quote(&dir)),
                INSTALL_TIMEOUT,
            )
            .await
        }
        .await;
        client.close().await;

        match result {
            Ok(_) => {
                let state = Observability {
                    enabled: true,
                    dashboard_url: observability::dashboard_url(&self.settings.grafana_url, &workload, &tenant_id),
                    tenant_id,
                    updated_at: Utc::now(),
                };
                workload.rendered_topology = Some(compose);
                workload.observability = Some(state.clone());
                self.store.save_workload(&workload).await?;
                info!(host_id = %host_id, "Observability enabled");
                Ok(OperationOutcome::ok(state))
            }
            Err(e) => {
                warn!(host_id = %host_id, error = %e, "Enabling observability failed");
                Ok(OperationOutcome::failed(&e))
            }
        }
    }

    /// Stop and drop the collector, removing it from the topology.
    #[instrument(skip(self), fields(workload_id = %workload_id))]
    pub async fn disable_observability(&self, workload_id: WorkloadId) -> Result<OperationOutcome<()>, OrchestratorError> {
        let host_id = assigned_host(&self.store.get_workload(workload_id).await?)?;
        let _guard = self.locks.lock(host_id).await;

        let mut workload = self.store.get_workload(workload_id).await?;
        let host = self.store.get_host(host_id).await?;
        let mut topology = workload
            .rendered_topology
            .as_deref()
            .map(Topology::parse)
            .transpose()?;
        let removed = topology
            .as_mut()
            .is_some_and(|t| t.remove_service(COLLECTOR_SERVICE));
        let compose = match (&topology, removed) {
            (Some(t), true) => Some(t.render()?),
            _ => None,
        };
        let dir = shell_quote(&self.layout().workload_dir(workload_id));

        let client = self.client();
        let result = async {
            let session = self.session(&client, &host).await?;
            run_checked(
                session.as_ref(),
                &format!(
                    "cd {dir} && docker compose stop {COLLECTOR_SERVICE} && docker compose rm -f {COLLECTOR_SERVICE}"
                ),
                DEFAULT_TIMEOUT,
            )
            .await?;
            if let Some(compose) = &compose {
                session
                    .upload_content(compose.as_bytes(), &self.layout().compose_path(workload_id))
                    .await?;
            }
            Ok::<_, OrchestratorError>(())
        }
        .await;
        client.close().await;

        match result {
            Ok(()) => {
                if let Some(compose) = compose {
                    workload.rendered_topology = Some(compose);
                }
                if let Some(state) = workload.observability.as_mut() {
                    state.enabled = false;
                    state.updated_at = Utc::now();
                }
                self.store.save_workload(&workload).await?;
                info!(host_id = %host_id, "Observability disabled");
                Ok(OperationOutcome::ok(()))
            }
            Err(e) => {
                warn!(host_id = %host_id, error = %e, "Disabling observability failed");
                Ok(OperationOutcome::failed(&e))
            }
        }
    }

    async fn assigned(&self, workload_id: WorkloadId) -> Result<(Workload, Host), OrchestratorError> {
        let workload = self.store.get_workload(workload_id).await?;
        let host = self.store.get_host(assigned_host(&workload)?).await?;
        Ok((workload, host))
    }
}

fn assigned_host(workload: &Workload) -> Result<HostId, OrchestratorError> {
    workload.host_id.ok_or_else(|| {
        OrchestratorError::InvalidState(format!("workload {} is not assigned to a host", workload.id))
    })
}
