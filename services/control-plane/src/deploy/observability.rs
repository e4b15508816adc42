//! Per-workload OpenTelemetry collector add-on.

use sha2::{Digest, Sha256};

use super::builtin::{OTEL_COLLECTOR_SERVICE, OTEL_CONFIG};
use super::render::{render, Placeholders};
use super::topology::parse_node;
use crate::error::OrchestratorError;
use crate::model::Workload;

pub const COLLECTOR_SERVICE: &str = "otel-collector";

/// Stable tenant id for a customer: first 16 hex chars of its SHA-256.
pub fn tenant_id(customer: &str) -> String {
    let digest = Sha256::digest(customer.as_bytes());
    hex::encode(digest)[..16].to_string()
}

pub fn dashboard_url(grafana_url: &str, workload: &Workload, tenant_id: &str) -> String {
    format!(
        "{}/d/{}?orgId={}",
        grafana_url.trim_end_matches('/'),
        workload.id.slug(),
        tenant_id
    )
}

pub fn collector_config(workload: &Workload, tenant_id: &str, endpoint: &str) -> Result<String, OrchestratorError> {
    let placeholders = Placeholders::new()
        .with("TENANT_ID", tenant_id)
        .with("SERVICE_ID", workload.id.slug())
        .with("OTEL_ENDPOINT", endpoint);
    render("otel-config", OTEL_CONFIG, &placeholders)
}

pub fn collector_service(workload: &Workload, data_path: &str) -> Result<serde_yaml::Value, OrchestratorError> {
    let placeholders = Placeholders::new()
        .with("SERVICE_ID", workload.id.slug())
        .with("DATA_PATH", data_path);
    parse_node(&render("otel-collector", OTEL_COLLECTOR_SERVICE, &placeholders)?)
}
