use std::sync::Arc;

use appz_id::{BackupId, WorkloadId};
use appz_remote::{shell_quote, Connector, RemoteClient, RemoteSession, BACKUP_TIMEOUT, DEFAULT_TIMEOUT};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::retention::select_expired;
use super::scripts::{backup_script, restore_script, with_environment};
use crate::deploy::stats::{disk_usage_command, parse_disk_usage_mb};
use crate::deploy::{run_checked, DeploySettings};
use crate::error::{OperationOutcome, OrchestratorError};
use crate::locks::HostLocks;
use crate::model::{
    BackupConfig, BackupManifest, BackupRecord, BackupStatus, Host, LastBackupStatus, Template, Workload,
    WorkloadStatus,
};
use crate::secrets::{Credentials, MasterKey};
use crate::storage::{file_name, ObjectStorage, StorageError};
use crate::store::RecordStore;

const BACKUP_STAGING_ROOT: &str = "/tmp/backups";
const RESTORE_STAGING_ROOT: &str = "/tmp/restore";

/// What a prune pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub removed: Vec<BackupId>,
    pub objects_deleted: usize,
}

/// Artifacts of one successful backup run.
struct Artifacts {
    prefix: String,
    manifest: BackupManifest,
    size_mb: u64,
}

/// Runs backups and restores through a local staging relay between the
/// host and object storage.
pub struct BackupOrchestrator {
    store: Arc<dyn RecordStore>,
    connector: Arc<dyn Connector>,
    locks: Arc<HostLocks>,
    storage: Arc<ObjectStorage>,
    master_key: Arc<MasterKey>,
    settings: DeploySettings,
}

impl BackupOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        connector: Arc<dyn Connector>,
        locks: Arc<HostLocks>,
        storage: Arc<ObjectStorage>,
        master_key: Arc<MasterKey>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            store,
            connector,
            locks,
            storage,
            master_key,
            settings,
        }
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.storage
    }

    /// Back up a workload.
    ///
    /// A missing configuration or an unplaced workload is returned as `Err`
    /// before any record exists. After that, every failure leaves exactly
    /// one `Failed` record and removes the objects uploaded so far.
    #[instrument(skip(self), fields(workload_id = %workload_id))]
    pub async fn run_backup(&self, workload_id: WorkloadId) -> Result<OperationOutcome<BackupRecord>, OrchestratorError> {
        let workload = self.store.get_workload(workload_id).await?;
        let mut config = self
            .store
            .backup_config_for_workload(workload_id)
            .await?
            .ok_or_else(|| OrchestratorError::ConfigurationMissing(format!("no backup configuration for {workload_id}")))?;
        let host = self.placed_host(&workload).await?;
        let template = self.store.get_template(workload.template_id).await?;

        let mut record = BackupRecord::start(workload.id, config.id, Utc::now());
        self.store.save_backup(&record).await?;
        info!(backup_id = %record.id, "Backup started");

        let mut uploaded = Vec::new();
        let result = {
            let _guard = self.locks.lock(host.id).await;
            let client = RemoteClient::new(Arc::clone(&self.connector));
            let result = self
                .backup_on_host(&client, &host, &workload, &template, &config, &record, &mut uploaded)
                .await;
            client.close().await;
            result
        };

        match result {
            Ok(artifacts) => {
                record.status = BackupStatus::Completed;
                record.location = Some(self.storage.location(&artifacts.prefix));
                record.size_mb = artifacts.size_mb;
                record.file_count = artifacts.manifest.files.len();
                record.manifest = Some(artifacts.manifest);
                record.can_restore = true;
                self.store.save_backup(&record).await?;

                config.last_backup_at = Some(record.timestamp);
                config.last_backup_status = Some(LastBackupStatus::Success);
                config.last_backup_size_mb = record.size_mb;
                config.total_backup_count += 1;
                self.store.save_backup_config(&config).await?;
                info!(backup_id = %record.id, size_mb = record.size_mb, files = record.file_count, "Backup completed");

                if let Err(e) = self.prune(workload_id).await {
                    warn!(error = %e, "Pruning after backup failed");
                }
                Ok(OperationOutcome::ok(record))
            }
            Err(e) => {
                warn!(backup_id = %record.id, error = %e, "Backup failed");
                self.storage.delete_best_effort(&uploaded).await;

                record.status = BackupStatus::Failed;
                record.error = Some(e.to_string());
                record.location = None;
                record.manifest = None;
                record.can_restore = false;
                self.store.save_backup(&record).await?;

                config.last_backup_status = Some(LastBackupStatus::Failed);
                self.store.save_backup_config(&config).await?;
                Ok(OperationOutcome::failed_with(&e, record))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn backup_on_host(
        &self,
        client: &RemoteClient,
        host: &Host,
        workload: &Workload,
        template: &Template,
        config: &BackupConfig,
        record: &BackupRecord,
        uploaded: &mut Vec<String>,
    ) -> Result<Artifacts, OrchestratorError> {
        let target = host.target(&self.settings.ssh_user, self.settings.ssh_key.as_ref());
        let session = client.session(&target).await?;

        let slug = workload.id.slug();
        let timestamp = record.timestamp.format("%Y%m%d-%H%M%S").to_string();
        // Two runs in the same second must not share a directory or prefix.
        let run = format!("{timestamp}-{}", record.id.slug());
        let staging = format!("{BACKUP_STAGING_ROOT}/{slug}-{run}");
        let script_path = format!("{staging}.sh");

        let result: Result<Artifacts, OrchestratorError> = async {
            run_checked(session.as_ref(), &format!("mkdir -p {}", shell_quote(&staging)), DEFAULT_TIMEOUT).await?;
            let script = self.script_file(workload, &staging, backup_script(template));
            self.run_script(session.as_ref(), &script, &script_path).await?;

            let du = session.exec(&disk_usage_command(&staging), DEFAULT_TIMEOUT).await?;
            let size_mb = parse_disk_usage_mb(&du.stdout).map_or(0, |mb| mb.round() as u64);

            let listing = run_checked(session.as_ref(), &format!("ls -1 {}", shell_quote(&staging)), DEFAULT_TIMEOUT).await?;
            let files: Vec<String> = listing
                .stdout
                .lines()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
            if files.is_empty() {
                return Err(OrchestratorError::IncompleteArtifact(format!(
                    "backup script left no files in {staging}"
                )));
            }

            let prefix = format!("{}/{slug}/{run}", config.prefix.trim_matches('/'));
            let relay = tempfile::tempdir().map_err(StorageError::from)?;
            for name in &files {
                let local = relay.path().join(name);
                session.download_file(&format!("{staging}/{name}"), &local).await?;
                let key = format!("{prefix}/{name}");
                self.storage.put_file(&key, &local).await?;
                debug!(key = %key, "Artifact stored");
                uploaded.push(key);
            }

            Ok(Artifacts {
                prefix,
                manifest: BackupManifest {
                    files,
                    timestamp,
                    template: template.name.clone(),
                },
                size_mb,
            })
        }
        .await;

        cleanup(session.as_ref(), &[&staging, &script_path]).await;
        result
    }

    /// Restore a completed backup onto the workload's host.
    ///
    /// The backup record is left as it is.
    #[instrument(skip(self), fields(backup_id = %backup_id))]
    pub async fn restore(&self, backup_id: BackupId) -> Result<OperationOutcome<()>, OrchestratorError> {
        let record = self.store.get_backup(backup_id).await?;
        if !record.is_restorable() {
            return Err(OrchestratorError::IncompleteArtifact(backup_id.to_string()));
        }
        let prefix = record
            .storage_prefix(self.storage.bucket())
            .ok_or_else(|| OrchestratorError::IncompleteArtifact(format!("{backup_id} has no storage location")))?;
        let workload = self.store.get_workload(record.workload_id).await?;
        let host = self.placed_host(&workload).await?;
        let template = self.store.get_template(workload.template_id).await?;

        let result = {
            let _guard = self.locks.lock(host.id).await;
            let client = RemoteClient::new(Arc::clone(&self.connector));
            let result = self
                .restore_on_host(&client, &host, &workload, &template, &record, &prefix)
                .await;
            client.close().await;
            result
        };

        match result {
            Ok(()) => {
                info!(workload_id = %workload.id, "Restore completed");
                Ok(OperationOutcome::ok(()))
            }
            Err(e) => {
                warn!(workload_id = %workload.id, error = %e, "Restore failed");
                Ok(OperationOutcome::failed(&e))
            }
        }
    }

    async fn restore_on_host(
        &self,
        client: &RemoteClient,
        host: &Host,
        workload: &Workload,
        template: &Template,
        record: &BackupRecord,
        prefix: &str,
    ) -> Result<(), OrchestratorError> {
        let keys = self.storage.list(prefix).await?;
        if keys.is_empty() {
            return Err(OrchestratorError::IncompleteArtifact(format!("no objects under {prefix}")));
        }

        let target = host.target(&self.settings.ssh_user, self.settings.ssh_key.as_ref());
        let session = client.session(&target).await?;

        let staging = format!("{RESTORE_STAGING_ROOT}/{}", record.id.slug());
        let script_path = format!("{staging}.sh");

        let result: Result<(), OrchestratorError> = async {
            let quoted = shell_quote(&staging);
            run_checked(session.as_ref(), &format!("rm -rf {quoted} && mkdir -p {quoted}"), DEFAULT_TIMEOUT).await?;

            let relay = tempfile::tempdir().map_err(StorageError::from)?;
            for key in &keys {
                let name = file_name(key);
                let local = relay.path().join(name);
                self.storage.get_to_file(key, &local).await?;
                session.upload_file(&local, &format!("{staging}/{name}")).await?;
            }

            let script = self.script_file(workload, &staging, restore_script(template));
            self.run_script(session.as_ref(), &script, &script_path).await
        }
        .await;

        cleanup(session.as_ref(), &[&staging, &script_path]).await;
        result
    }

    /// Delete this workload's expired backups from storage and the store.
    ///
    /// Object deletion failures are logged; the record is removed anyway.
    #[instrument(skip(self), fields(workload_id = %workload_id))]
    pub async fn prune(&self, workload_id: WorkloadId) -> Result<PruneReport, OrchestratorError> {
        let config = self
            .store
            .backup_config_for_workload(workload_id)
            .await?
            .ok_or_else(|| OrchestratorError::ConfigurationMissing(format!("no backup configuration for {workload_id}")))?;
        let records = self.store.list_backups_for_workload(workload_id).await?;

        let mut report = PruneReport::default();
        for record in select_expired(&records, config.retention_days, Utc::now()) {
            if let Some(prefix) = record.storage_prefix(self.storage.bucket()) {
                match self.storage.delete_prefix(&prefix).await {
                    Ok(count) => report.objects_deleted += count,
                    Err(e) => warn!(backup_id = %record.id, error = %e, "Failed to delete backup objects"),
                }
            }
            self.store.delete_backup(record.id).await?;
            report.removed.push(record.id);
        }

        if !report.removed.is_empty() {
            info!(removed = report.removed.len(), objects = report.objects_deleted, "Pruned backups");
        }
        Ok(report)
    }

    async fn placed_host(&self, workload: &Workload) -> Result<Host, OrchestratorError> {
        if !matches!(workload.status, WorkloadStatus::Active | WorkloadStatus::Suspended) {
            return Err(OrchestratorError::InvalidState(format!(
                "cannot back up or restore a workload in status {}",
                workload.status.as_str()
            )));
        }
        let host_id = workload.host_id.ok_or_else(|| {
            OrchestratorError::InvalidState(format!("workload {} is not assigned to a host", workload.id))
        })?;
        Ok(self.store.get_host(host_id).await?)
    }

    /// Script file body with the workload's environment exported.
    fn script_file(&self, workload: &Workload, staging: &str, body: &str) -> String {
        let slug = workload.id.slug();
        let data_path = self.settings.layout.workload_dir(workload.id);
        let password = workload.credentials.as_ref().and_then(|sealed| {
            Credentials::open(&self.master_key, sealed, &workload.credentials_aad())
                .map_err(|e| warn!(error = %e, "Credentials unavailable, DB_ROOT_PASSWORD not set"))
                .ok()
        });

        let mut env = vec![
            ("SERVICE_ID", slug.as_str()),
            ("DATA_PATH", data_path.as_str()),
            ("BACKUP_PATH", staging),
        ];
        if let Some(credentials) = &password {
            env.push(("DB_ROOT_PASSWORD", credentials.db_root_password.as_str()));
        }
        with_environment(&env, body)
    }

    /// Upload the script and run it. Its contents never appear in the
    /// command line or in errors.
    async fn run_script(&self, session: &dyn RemoteSession, script: &str, path: &str) -> Result<(), OrchestratorError> {
        session.upload_content(script.as_bytes(), path).await?;
        let command = format!("sh {}", shell_quote(path));
        let output = session.exec(&command, BACKUP_TIMEOUT).await?;
        if !output.success() {
            return Err(OrchestratorError::command_failure(command, &output));
        }
        Ok(())
    }
}

async fn cleanup(session: &dyn RemoteSession, paths: &[&str]) {
    let quoted: Vec<String> = paths.iter().map(|p| shell_quote(p)).collect();
    let command = format!("rm -rf {}", quoted.join(" "));
    match session.exec(&command, DEFAULT_TIMEOUT).await {
        Ok(output) if output.success() => {}
        Ok(output) => warn!(stderr = %output.stderr.trim(), "Staging cleanup failed"),
        Err(e) => warn!(error = %e, "Staging cleanup failed"),
    }
}
