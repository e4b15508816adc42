//! Record-store boundary.
//!
//! The orchestrators consume records through [`RecordStore`] only: get by id,
//! query by owner, save. Listing order is id order, which for ULIDs is
//! creation order; first-fit placement relies on it.

mod memory;

use appz_id::{BackupConfigId, BackupId, HostId, TemplateId, WorkloadId};
use async_trait::async_trait;
use thiserror::Error;

use crate::model::{BackupConfig, BackupRecord, Host, Template, Workload};

pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("record store unavailable: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    // Hosts
    async fn get_host(&self, id: HostId) -> Result<Host, StoreError>;
    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError>;
    async fn save_host(&self, host: &Host) -> Result<(), StoreError>;

    // Workloads
    async fn get_workload(&self, id: WorkloadId) -> Result<Workload, StoreError>;
    async fn list_workloads(&self) -> Result<Vec<Workload>, StoreError>;
    async fn list_workloads_on_host(&self, host_id: HostId) -> Result<Vec<Workload>, StoreError>;
    async fn save_workload(&self, workload: &Workload) -> Result<(), StoreError>;

    // Templates
    async fn get_template(&self, id: TemplateId) -> Result<Template, StoreError>;
    async fn list_templates(&self) -> Result<Vec<Template>, StoreError>;
    async fn save_template(&self, template: &Template) -> Result<(), StoreError>;

    // Backup records
    async fn get_backup(&self, id: BackupId) -> Result<BackupRecord, StoreError>;
    async fn list_backups_for_workload(
        &self,
        workload_id: WorkloadId,
    ) -> Result<Vec<BackupRecord>, StoreError>;
    async fn save_backup(&self, backup: &BackupRecord) -> Result<(), StoreError>;
    async fn delete_backup(&self, id: BackupId) -> Result<(), StoreError>;

    // Backup configuration
    async fn get_backup_config(&self, id: BackupConfigId) -> Result<BackupConfig, StoreError>;
    async fn backup_config_for_workload(
        &self,
        workload_id: WorkloadId,
    ) -> Result<Option<BackupConfig>, StoreError>;
    async fn list_backup_configs(&self) -> Result<Vec<BackupConfig>, StoreError>;
    async fn save_backup_config(&self, config: &BackupConfig) -> Result<(), StoreError>;
}
