//! Scoped per-operation session cache.

use std::collections::HashMap;
use std::sync::Arc;

use appz_id::HostId;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::session::{Connector, HostTarget, RemoteSession};

/// Owns the sessions opened during one orchestrator operation.
///
/// At most one live session is kept per host. `close()` releases them in an
/// orderly way; dropping the client releases them regardless, so an early
/// return or `?` never leaks a connection.
pub struct RemoteClient {
    connector: Arc<dyn Connector>,
    sessions: Mutex<HashMap<HostId, Arc<dyn RemoteSession>>>,
}

impl RemoteClient {
    /// Create an empty client.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached session for `target`, connecting on first use.
    pub async fn session(&self, target: &HostTarget) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        // Held across connect so two callers never open two sessions.
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&target.host_id) {
            return Ok(Arc::clone(session));
        }

        let session = self.connector.connect(target).await?;
        sessions.insert(target.host_id, Arc::clone(&session));
        debug!(host_id = %target.host_id, "Cached remote session");
        Ok(session)
    }

    /// Number of open sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Close every cached session. Close failures are logged.
    pub async fn close(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (host_id, session) in sessions {
            if let Err(e) = session.close().await {
                warn!(host_id = %host_id, error = %e, "Failed to close remote session");
            }
        }
    }
}
