//! Topologies and host setup shipped with the control plane.

use crate::error::OrchestratorError;
use crate::model::Template;

const WORDPRESS: &str = include_str!("../../topologies/wordpress.yml");
const N8N: &str = include_str!("../../topologies/n8n.yml");
const GHOST: &str = include_str!("../../topologies/ghost.yml");

/// Compose file of the shared Caddy proxy. Placeholder: `PROXY_PATH`.
pub const PROXY_TOPOLOGY: &str = include_str!("../../topologies/caddy.yml");

/// Collector config. Placeholders: `TENANT_ID`, `SERVICE_ID`, `OTEL_ENDPOINT`.
pub const OTEL_CONFIG: &str = include_str!("../../topologies/otel-config.yaml");

/// Collector service node. Placeholders: `SERVICE_ID`, `DATA_PATH`.
pub const OTEL_COLLECTOR_SERVICE: &str = include_str!("../../topologies/otel-collector.yml");

pub const DOCKER_NETWORK: &str = "appz-network";

/// Steps run once per host before anything is deployed on it.
pub const HOST_SETUP_COMMANDS: &[&str] = &[
    "command -v docker >/dev/null 2>&1 || curl -fsSL https://get.docker.com | sh",
    "docker network create appz-network",
    "docker pull caddy:2-alpine",
];

pub fn builtin_topology(template_name: &str) -> Option<&'static str> {
    match template_name.trim().to_ascii_lowercase().as_str() {
        "wordpress" => Some(WORDPRESS),
        "n8n" => Some(N8N),
        "ghost" => Some(GHOST),
        _ => None,
    }
}

/// The template's own topology, else the built-in for its name.
pub fn resolve_topology(template: &Template) -> Result<&str, OrchestratorError> {
    match template.topology.as_deref() {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => builtin_topology(&template.name).ok_or_else(|| {
            OrchestratorError::ConfigurationMissing(format!(
                "template {} has no topology",
                template.name
            ))
        }),
    }
}
