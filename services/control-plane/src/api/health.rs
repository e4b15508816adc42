//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::model::WorkloadStatus;
use crate::state::AppState;

/// Object prefix listed to prove the bucket answers. Nothing is stored there.
const READINESS_PREFIX: &str = "readyz";

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// ISO 8601.
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadinessResponse {
    /// "ok" or "degraded".
    pub status: String,
    pub record_store: ComponentStatus,
    pub object_storage: ComponentStatus,
    pub hosts: usize,
    pub active_workloads: usize,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentStatus {
    fn from_result<T, E: std::fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self {
                status: "ok".to_string(),
                message: None,
            },
            Err(e) => Self {
                status: "unavailable".to_string(),
                message: Some(e.to_string()),
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

/// Is the service running? Does not check dependencies.
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "control-plane".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Can the record store and the backup bucket be reached? 503 otherwise.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let hosts = state.store().list_hosts().await;
    let workloads = state.store().list_workloads().await;
    let storage = state.backups().storage().list(READINESS_PREFIX).await;

    let record_store = match &hosts {
        Ok(_) => ComponentStatus::from_result(&workloads),
        Err(_) => ComponentStatus::from_result(&hosts),
    };
    let object_storage = ComponentStatus::from_result(&storage);
    let ready = record_store.is_ok() && object_storage.is_ok();

    let response = ReadinessResponse {
        status: if ready { "ok" } else { "degraded" }.to_string(),
        record_store,
        object_storage,
        hosts: hosts.map(|h| h.len()).unwrap_or_default(),
        active_workloads: workloads
            .map(|w| w.iter().filter(|w| w.status == WorkloadStatus::Active).count())
            .unwrap_or_default(),
    };

    if ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use appz_remote::mock::MockConnector;

    use super::*;
    use crate::deploy::DeploySettings;
    use crate::model::{Host, Resources};
    use crate::secrets::MasterKey;
    use crate::storage::ObjectStorage;
    use crate::store::{InMemoryStore, RecordStore};

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_livez_returns_ok() {
        let response = livez().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_counts_fleet() {
        let store = Arc::new(InMemoryStore::new());
        store
            .save_host(&Host::new("h1", "10.0.0.1", Resources::new(8.0, 4.0, 80.0)))
            .await
            .unwrap();
        let state = AppState::new(
            store,
            Arc::new(MockConnector::new()),
            Arc::new(ObjectStorage::in_memory("appz-backups")),
            Arc::new(MasterKey::generate()),
            DeploySettings::default(),
            None,
        )
        .unwrap();

        let response = readyz(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
