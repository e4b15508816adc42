//! Application state shared across request handlers and workers.

use std::sync::Arc;

use appz_remote::Connector;

use crate::backup::BackupOrchestrator;
use crate::capacity::CapacityAdvisor;
use crate::deploy::{DeployOrchestrator, DeploySettings};
use crate::locks::HostLocks;
use crate::monitoring::Monitor;
use crate::providers::Provider;
use crate::secrets::MasterKey;
use crate::storage::ObjectStorage;
use crate::store::RecordStore;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn RecordStore>,
    locks: Arc<HostLocks>,
    deploy: Arc<DeployOrchestrator>,
    backups: Arc<BackupOrchestrator>,
    monitor: Arc<Monitor>,
    advisor: CapacityAdvisor,
    provider: Option<Arc<dyn Provider>>,
}

impl AppState {
    /// Wire the orchestrators around one record store, connector and set
    /// of host locks.
    pub fn new(
        store: Arc<dyn RecordStore>,
        connector: Arc<dyn Connector>,
        storage: Arc<ObjectStorage>,
        master_key: Arc<MasterKey>,
        settings: DeploySettings,
        provider: Option<Arc<dyn Provider>>,
    ) -> Result<Self, reqwest::Error> {
        let locks = Arc::new(HostLocks::new());
        let deploy = DeployOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&connector),
            Arc::clone(&locks),
            Arc::clone(&master_key),
            settings.clone(),
        )
        .with_backup_bucket(storage.bucket());
        let backups = BackupOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&connector),
            Arc::clone(&locks),
            storage,
            master_key,
            settings.clone(),
        );
        let monitor = Monitor::new(Arc::clone(&store), connector, Arc::clone(&locks), settings)?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                store,
                locks,
                deploy: Arc::new(deploy),
                backups: Arc::new(backups),
                monitor: Arc::new(monitor),
                advisor: CapacityAdvisor::default(),
                provider,
            }),
        })
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.inner.store.as_ref()
    }

    pub fn store_handle(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.inner.store)
    }

    /// Per-host locks shared by every orchestrator.
    pub fn locks(&self) -> &HostLocks {
        &self.inner.locks
    }

    pub fn deploy(&self) -> &DeployOrchestrator {
        &self.inner.deploy
    }

    pub fn backups(&self) -> Arc<BackupOrchestrator> {
        Arc::clone(&self.inner.backups)
    }

    pub fn monitor(&self) -> Arc<Monitor> {
        Arc::clone(&self.inner.monitor)
    }

    pub fn advisor(&self) -> &CapacityAdvisor {
        &self.inner.advisor
    }

    /// The configured cloud provider, if any.
    pub fn provider(&self) -> Option<&dyn Provider> {
        self.inner.provider.as_deref()
    }
}
