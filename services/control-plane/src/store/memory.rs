//! In-memory record store.

use std::collections::BTreeMap;

use appz_id::{BackupConfigId, BackupId, HostId, TemplateId, WorkloadId};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{RecordStore, StoreError};
use crate::model::{BackupConfig, BackupRecord, Host, Template, Workload};

#[derive(Default)]
struct Tables {
    hosts: BTreeMap<HostId, Host>,
    workloads: BTreeMap<WorkloadId, Workload>,
    templates: BTreeMap<TemplateId, Template>,
    backups: BTreeMap<BackupId, BackupRecord>,
    backup_configs: BTreeMap<BackupConfigId, BackupConfig>,
}

/// Reference [`RecordStore`] backed by ordered maps.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get_host(&self, id: HostId) -> Result<Host, StoreError> {
        self.tables
            .read()
            .await
            .hosts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("host", id))
    }

    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        Ok(self.tables.read().await.hosts.values().cloned().collect())
    }

    async fn save_host(&self, host: &Host) -> Result<(), StoreError> {
        self.tables.write().await.hosts.insert(host.id, host.clone());
        Ok(())
    }

    async fn get_workload(&self, id: WorkloadId) -> Result<Workload, StoreError> {
        self.tables
            .read()
            .await
            .workloads
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("workload", id))
    }

    async fn list_workloads(&self) -> Result<Vec<Workload>, StoreError> {
        Ok(self.tables.read().await.workloads.values().cloned().collect())
    }

    async fn list_workloads_on_host(&self, host_id: HostId) -> Result<Vec<Workload>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .workloads
            .values()
            .filter(|w| w.host_id == Some(host_id))
            .cloned()
            .collect())
    }

    async fn save_workload(&self, workload: &Workload) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .workloads
            .insert(workload.id, workload.clone());
        Ok(())
    }

    async fn get_template(&self, id: TemplateId) -> Result<Template, StoreError> {
        self.tables
            .read()
            .await
            .templates
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("template", id))
    }

    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        Ok(self.tables.read().await.templates.values().cloned().collect())
    }

    async fn save_template(&self, template: &Template) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .templates
            .insert(template.id, template.clone());
        Ok(())
    }

    async fn get_backup(&self, id: BackupId) -> Result<BackupRecord, StoreError> {
        self.tables
            .read()
            .await
            .backups
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("backup", id))
    }

    async fn list_backups_for_workload(
        &self,
        workload_id: WorkloadId,
    ) -> Result<Vec<BackupRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .backups
            .values()
            .filter(|b| b.workload_id == workload_id)
            .cloned()
            .collect())
    }

    async fn save_backup(&self, backup: &BackupRecord) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .backups
            .insert(backup.id, backup.clone());
        Ok(())
    }

    async fn delete_backup(&self, id: BackupId) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .backups
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("backup", id))
    }

    async fn get_backup_config(&self, id: BackupConfigId) -> Result<BackupConfig, StoreError> {
        self.tables
            .read()
            .await
            .backup_configs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("backup config", id))
    }

    async fn backup_config_for_workload(
        &self,
        workload_id: WorkloadId,
    ) -> Result<Option<BackupConfig>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .backup_configs
            .values()
            .find(|c| c.workload_id == workload_id)
            .cloned())
    }

    async fn list_backup_configs(&self) -> Result<Vec<BackupConfig>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .backup_configs
            .values()
            .cloned()
            .collect())
    }

    async fn save_backup_config(&self, config: &BackupConfig) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .backup_configs
            .insert(config.id, config.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Footprint, Resources, WorkloadStatus};

    #[tokio::test]
    async fn test_hosts_listed_in_creation_order() {
        let store = InMemoryStore::new();
        let first = Host::new("a", "10.0.0.1", Resources::new(8.0, 4.0, 80.0));
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = Host::new("b", "10.0.0.2", Resources::new(8.0, 4.0, 80.0));

        store.save_host(&second).await.unwrap();
        store.save_host(&first).await.unwrap();

        let names: Vec<_> = store
            .list_hosts()
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_workloads_filtered_by_host() {
        let store = InMemoryStore::new();
        let host = Host::new("a", "10.0.0.1", Resources::new(8.0, 4.0, 80.0));
        let template = Template::new("wordpress", Footprint::ZERO, Footprint::ZERO, 80);

        let mut placed = Workload::new("acme", template.id, "a.test");
        placed.host_id = Some(host.id);
        placed.status = WorkloadStatus::Active;
        let unplaced = Workload::new("acme", template.id, "b.test");

        store.save_workload(&placed).await.unwrap();
        store.save_workload(&unplaced).await.unwrap();

        let on_host = store.list_workloads_on_host(host.id).await.unwrap();
        assert_eq!(on_host.len(), 1);
        assert_eq!(on_host[0].id, placed.id);
    }

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_host(HostId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "host", .. }));
        assert!(store.delete_backup(BackupId::new()).await.is_err());
    }
}
