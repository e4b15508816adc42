//! Per-host mutual exclusion.
//!
//! Every mutating operation against a host (placement, deploy, lifecycle
//! commands, proxy regeneration, backup, restore) holds that host's lock for
//! its whole duration. Operations on different hosts run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use appz_id::HostId;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Held while a host is being mutated.
pub type HostGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct HostLocks {
    locks: Mutex<HashMap<HostId, Arc<tokio::sync::Mutex<()>>>>,
}

impl HostLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `host_id`.
    pub async fn lock(&self, host_id: HostId) -> HostGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(host_id).or_default())
        };
        let guard = lock.lock_owned().await;
        debug!(host_id = %host_id, "Acquired host lock");
        guard
    }
}
