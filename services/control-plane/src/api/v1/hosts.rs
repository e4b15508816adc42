//! Host API endpoints.
//!
//! Hosts are registered by hand or provisioned through the configured cloud
//! provider, then prepared with `setup`. Decommissioned hosts are kept.

use std::collections::BTreeMap;
use std::path::PathBuf;

use appz_id::{HostId, TemplateId};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::parse_id;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::capacity::advisor::estimate;
use crate::model::{Host, Resources, DEFAULT_MAX_CPU_PERCENT, DEFAULT_MAX_RAM_PERCENT};
use crate::providers::{decommission_host, provision_host, ProvisionRequest};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_hosts).post(register_host))
        .route("/provision", post(provision))
        .route("/{host_id}", get(get_host).delete(decommission))
        .route("/{host_id}/refresh", post(refresh_host))
        .route("/{host_id}/setup", post(setup_host))
        .route("/{host_id}/capacity", get(capacity_all))
        .route("/{host_id}/capacity/{template_id}", get(capacity_for_template))
        .route("/{host_id}/capacity/{template_id}/fit", get(capacity_fit))
}

#[derive(Debug, Deserialize)]
pub struct RegisterHostRequest {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
    pub capacity: Resources,
    #[serde(default)]
    pub max_ram_percent: Option<f64>,
    #[serde(default)]
    pub max_cpu_percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct FitQuery {
    pub count: Option<u32>,
}

fn validate_percent(value: f64, field: &str, request_id: &str) -> Result<f64, ApiError> {
    if value > 0.0 && value <= 100.0 {
        Ok(value)
    } else {
        Err(ApiError::bad_request("invalid_input", format!("{field} must be in (0, 100]"))
            .with_request_id(request_id.to_string()))
    }
}

/// POST /v1/hosts
async fn register_host(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<RegisterHostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    if req.name.trim().is_empty() || req.address.trim().is_empty() {
        return Err(ApiError::bad_request("invalid_input", "name and address are required")
            .with_request_id(request_id));
    }
    let Resources {
        ram_gb,
        cpu_cores,
        storage_gb,
    } = req.capacity;
    if ram_gb <= 0.0 || cpu_cores <= 0.0 || storage_gb <= 0.0 {
        return Err(ApiError::bad_request("invalid_input", "capacity must be positive in every dimension")
            .with_request_id(request_id));
    }
    let max_ram = validate_percent(req.max_ram_percent.unwrap_or(DEFAULT_MAX_RAM_PERCENT), "max_ram_percent", &request_id)?;
    let max_cpu = validate_percent(req.max_cpu_percent.unwrap_or(DEFAULT_MAX_CPU_PERCENT), "max_cpu_percent", &request_id)?;

    let mut host = Host::new(req.name.trim(), req.address.trim(), req.capacity).with_ceilings(max_ram, max_cpu);
    if let Some(port) = req.ssh_port {
        host.ssh_port = port;
    }
    host.ssh_key = req.ssh_key;

    state
        .store()
        .save_host(&host)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;
    tracing::info!(host_id = %host.id, address = %host.address, "Host registered");
    Ok((StatusCode::CREATED, Json(host)))
}

/// POST /v1/hosts/provision
async fn provision(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<ProvisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    let Some(provider) = state.provider() else {
        return Err(ApiError::bad_request("provider_not_configured", "No cloud provider is configured")
            .with_request_id(request_id));
    };
    let host = provision_host(provider, state.store(), &req)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;
    Ok((StatusCode::CREATED, Json(host)))
}

/// GET /v1/hosts
async fn list_hosts(State(state): State<AppState>, ctx: RequestContext) -> Result<impl IntoResponse, ApiError> {
    let hosts = state
        .store()
        .list_hosts()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(hosts))
}

/// GET /v1/hosts/{host_id}
async fn get_host(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(host_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id: HostId = parse_id(&host_id, "host", &ctx.request_id)?;
    let host = state
        .store()
        .get_host(host_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(host))
}

/// DELETE /v1/hosts/{host_id}
///
/// Destroys the server and marks the host `decommissioned`. 409 while
/// workloads remain on it.
async fn decommission(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(host_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id: HostId = parse_id(&host_id, "host", &ctx.request_id)?;
    let host = decommission_host(state.provider(), state.store(), state.locks(), host_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(host))
}

/// POST /v1/hosts/{host_id}/refresh
///
/// Measures the host's active workloads and recomputes its usage.
async fn refresh_host(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(host_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id: HostId = parse_id(&host_id, "host", &ctx.request_id)?;
    let outcome = state
        .monitor()
        .measure_host(host_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(outcome))
}

/// POST /v1/hosts/{host_id}/setup
async fn setup_host(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(host_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id: HostId = parse_id(&host_id, "host", &ctx.request_id)?;
    let outcome = state
        .deploy()
        .setup_host(host_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(outcome))
}

/// GET /v1/hosts/{host_id}/capacity
///
/// How many more instances of each template fit.
async fn capacity_all(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(host_id): Path<String>,
) -> Result<Json<BTreeMap<String, u32>>, ApiError> {
    let host_id: HostId = parse_id(&host_id, "host", &ctx.request_id)?;
    let host = state
        .store()
        .get_host(host_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    let templates = state
        .store()
        .list_templates()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(state.advisor().suggest_all(&host, &templates)))
}

/// GET /v1/hosts/{host_id}/capacity/{template_id}
async fn capacity_for_template(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((host_id, template_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id: HostId = parse_id(&host_id, "host", &ctx.request_id)?;
    let template_id: TemplateId = parse_id(&template_id, "template", &ctx.request_id)?;
    let host = state
        .store()
        .get_host(host_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    let template = state
        .store()
        .get_template(template_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(state.advisor().suggest_capacity(&host, &template)))
}

/// GET /v1/hosts/{host_id}/capacity/{template_id}/fit?count=N
///
/// Projected utilisation of `count` more instances (default 1) and the
/// first ceiling they would break.
async fn capacity_fit(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((host_id, template_id)): Path<(String, String)>,
    Query(query): Query<FitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id: HostId = parse_id(&host_id, "host", &ctx.request_id)?;
    let template_id: TemplateId = parse_id(&template_id, "template", &ctx.request_id)?;
    let count = query.count.unwrap_or(1);
    if count == 0 {
        return Err(ApiError::bad_request("invalid_input", "count must be at least 1").with_request_id(ctx.request_id));
    }
    let host = state
        .store()
        .get_host(host_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    let template = state
        .store()
        .get_template(template_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(state.advisor().fit_report(&host, &estimate(&template), count)))
}
