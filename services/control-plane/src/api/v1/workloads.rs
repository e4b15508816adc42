//! Workload API endpoints.
//!
//! Lifecycle endpoints return the `{success, error?}` outcome of the
//! operation; failures after a state transition are reported there rather
//! than as problem documents.

use appz_id::{TemplateId, WorkloadId};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::deploy::normalize_domain;
use crate::model::{
    BackupConfig, BackupFrequency, Footprint, Observability, Workload, WorkloadStatus,
};
use crate::state::AppState;

const DEFAULT_LOG_LINES: u32 = 100;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workloads).post(create_workload))
        .route("/{workload_id}", get(get_workload))
        .route("/{workload_id}/deploy", post(deploy))
        .route("/{workload_id}/start", post(start))
        .route("/{workload_id}/stop", post(stop))
        .route("/{workload_id}/restart", post(restart))
        .route("/{workload_id}/remove", post(remove))
        .route("/{workload_id}/logs", get(logs))
        .route("/{workload_id}/stats", get(stats))
        .route("/{workload_id}/health", get(health))
        .route("/{workload_id}/backups", get(list_backups).post(run_backup))
        .route("/{workload_id}/backup-config", get(get_backup_config).put(put_backup_config))
        .route(
            "/{workload_id}/observability",
            post(enable_observability).delete(disable_observability),
        )
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateWorkloadRequest {
    pub customer: String,
    pub template_id: TemplateId,
    pub domain: String,
    #[serde(default)]
    pub backup_enabled: bool,
    #[serde(default)]
    pub observability_enabled: bool,
}

/// Workload as exposed over the API. Sealed credentials stay server-side.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct WorkloadResponse {
    pub id: WorkloadId,
    pub customer: String,
    pub host_id: Option<appz_id::HostId>,
    pub template_id: TemplateId,
    pub domain: String,
    pub status: WorkloadStatus,
    pub measured: Option<Footprint>,
    pub measured_cpu_percent: Option<f64>,
    pub observability: Option<Observability>,
    pub backup_enabled: bool,
    pub observability_enabled: bool,
    pub last_error: Option<String>,
    pub error_at: Option<DateTime<Utc>>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Workload> for WorkloadResponse {
    fn from(w: Workload) -> Self {
        Self {
            id: w.id,
            customer: w.customer,
            host_id: w.host_id,
            template_id: w.template_id,
            domain: w.domain,
            status: w.status,
            measured: w.measured,
            measured_cpu_percent: w.measured_cpu_percent,
            observability: w.observability,
            backup_enabled: w.backup_enabled,
            observability_enabled: w.observability_enabled,
            last_error: w.last_error,
            error_at: w.error_at,
            deployed_at: w.deployed_at,
            created_at: w.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub lines: u32,
    pub logs: String,
}

/// Partial update of a workload's backup configuration.
#[derive(Debug, Default, Deserialize)]
pub struct BackupConfigRequest {
    pub enabled: Option<bool>,
    pub frequency: Option<BackupFrequency>,
    pub backup_time: Option<String>,
    pub retention_days: Option<u32>,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /v1/workloads
async fn create_workload(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateWorkloadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    if req.customer.trim().is_empty() {
        return Err(ApiError::bad_request("invalid_input", "customer is required").with_request_id(request_id));
    }
    let domain = normalize_domain(&req.domain).map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
    state
        .store()
        .get_template(req.template_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    let existing = state
        .store()
        .list_workloads()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
    if existing
        .iter()
        .any(|w| w.domain == domain && w.status != WorkloadStatus::Removed)
    {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "domain_taken",
            format!("Domain {domain} is already in use"),
        )
        .with_request_id(request_id));
    }

    let mut workload = Workload::new(req.customer.trim(), req.template_id, domain);
    workload.backup_enabled = req.backup_enabled;
    workload.observability_enabled = req.observability_enabled;
    state
        .store()
        .save_workload(&workload)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;
    tracing::info!(workload_id = %workload.id, domain = %workload.domain, "Workload created");
    Ok((StatusCode::CREATED, Json(WorkloadResponse::from(workload))))
}

/// GET /v1/workloads
async fn list_workloads(State(state): State<AppState>, ctx: RequestContext) -> Result<impl IntoResponse, ApiError> {
    let workloads = state
        .store()
        .list_workloads()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(
        workloads.into_iter().map(WorkloadResponse::from).collect::<Vec<_>>(),
    ))
}

/// GET /v1/workloads/{workload_id}
async fn get_workload(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let workload = state
        .store()
        .get_workload(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(WorkloadResponse::from(workload)))
}

/// POST /v1/workloads/{workload_id}/deploy
async fn deploy(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let outcome = state
        .deploy()
        .deploy(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(outcome))
}

/// POST /v1/workloads/{workload_id}/start
async fn start(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let outcome = state
        .deploy()
        .start(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(outcome))
}

/// POST /v1/workloads/{workload_id}/stop
async fn stop(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let outcome = state
        .deploy()
        .stop(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(outcome))
}

/// POST /v1/workloads/{workload_id}/restart
async fn restart(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let outcome = state
        .deploy()
        .restart(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(outcome))
}

/// POST /v1/workloads/{workload_id}/remove
async fn remove(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let outcome = state
        .deploy()
        .remove(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(outcome))
}

/// GET /v1/workloads/{workload_id}/logs?lines=N
async fn logs(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let lines = query.lines.unwrap_or(DEFAULT_LOG_LINES);
    let logs = state
        .deploy()
        .logs(workload_id, lines)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(LogsResponse { lines, logs }))
}

/// GET /v1/workloads/{workload_id}/stats
async fn stats(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let stats = state
        .deploy()
        .stats(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(stats))
}

/// GET /v1/workloads/{workload_id}/health
async fn health(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let report = state
        .monitor()
        .check_health(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(report))
}

/// GET /v1/workloads/{workload_id}/backups
async fn list_backups(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let records = state
        .store()
        .list_backups_for_workload(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(records))
}

/// POST /v1/workloads/{workload_id}/backups
async fn run_backup(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let outcome = state
        .backups()
        .run_backup(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(outcome))
}

/// GET /v1/workloads/{workload_id}/backup-config
async fn get_backup_config(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &request_id)?;
    let config = state
        .store()
        .backup_config_for_workload(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
    match config {
        Some(config) => Ok(Json(config)),
        None => Err(ApiError::not_found(
            "backup_config_not_found",
            format!("Workload {workload_id} has no backup configuration"),
        )
        .with_request_id(request_id)),
    }
}

/// PUT /v1/workloads/{workload_id}/backup-config
///
/// Creates the configuration with defaults on first use; fields left out
/// keep their current values.
async fn put_backup_config(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
    Json(req): Json<BackupConfigRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &request_id)?;
    state
        .store()
        .get_workload(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    let mut config = state
        .store()
        .backup_config_for_workload(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?
        .unwrap_or_else(|| BackupConfig::default_for(workload_id, state.backups().storage().bucket()));

    if let Some(enabled) = req.enabled {
        config.enabled = enabled;
    }
    if let Some(frequency) = req.frequency {
        config.frequency = frequency;
    }
    if let Some(backup_time) = req.backup_time {
        config.backup_time = backup_time;
    }
    if let Some(retention_days) = req.retention_days {
        config.retention_days = retention_days;
    }
    if let Some(bucket) = req.bucket {
        config.bucket = bucket;
    }
    if let Some(prefix) = req.prefix {
        config.prefix = prefix;
    }
    config
        .validate()
        .map_err(|msg| ApiError::bad_request("invalid_input", msg).with_request_id(request_id.clone()))?;

    state
        .store()
        .save_backup_config(&config)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;
    Ok(Json(config))
}

/// POST /v1/workloads/{workload_id}/observability
async fn enable_observability(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let outcome = state
        .deploy()
        .enable_observability(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(outcome))
}

/// DELETE /v1/workloads/{workload_id}/observability
async fn disable_observability(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(workload_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workload_id: WorkloadId = parse_id(&workload_id, "workload", &ctx.request_id)?;
    let outcome = state
        .deploy()
        .disable_observability(workload_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(outcome))
}
