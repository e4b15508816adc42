//! Deployment orchestration: turns workload records into running compose
//! projects on remote hosts and keeps each host's proxy config in sync.

pub mod builtin;
pub mod observability;
mod orchestrator;
pub mod proxy;
pub mod render;
pub mod stats;
pub mod topology;

use std::path::PathBuf;
use std::time::Duration;

use appz_id::WorkloadId;
use appz_remote::{ExecOutput, RemoteSession};

use crate::error::OrchestratorError;

pub use orchestrator::{DeployOrchestrator, DeployReport};
pub use topology::Topology;

/// Where things live on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    apps_root: String,
}

impl RemoteLayout {
    pub fn new(apps_root: impl Into<String>) -> Self {
        let apps_root = apps_root.into();
        let trimmed = apps_root.trim_end_matches('/');
        Self {
            apps_root: if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() },
        }
    }

    pub fn apps_root(&self) -> &str {
        &self.apps_root
    }

    pub fn workload_dir(&self, id: WorkloadId) -> String {
        format!("{}/{}", self.apps_root, id.slug())
    }

    pub fn compose_path(&self, id: WorkloadId) -> String {
        format!("{}/docker-compose.yml", self.workload_dir(id))
    }

    pub fn otel_config_path(&self, id: WorkloadId) -> String {
        format!("{}/otel-config.yaml", self.workload_dir(id))
    }

    pub fn proxy_dir(&self) -> String {
        format!("{}/caddy", self.apps_root)
    }

    pub fn caddyfile_path(&self) -> String {
        format!("{}/Caddyfile", self.proxy_dir())
    }
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self::new("/apps")
    }
}

/// Settings shared by every deployment operation.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub layout: RemoteLayout,
    pub ssh_user: String,
    /// Used for hosts without their own key.
    pub ssh_key: Option<PathBuf>,
    pub otel_endpoint: String,
    pub grafana_url: String,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            layout: RemoteLayout::default(),
            ssh_user: "root".to_string(),
            ssh_key: None,
            otel_endpoint: "https://otel.appz.studio".to_string(),
            grafana_url: "https://grafana.appz.studio".to_string(),
        }
    }
}

/// Run `command`, turning a non-zero exit into `CommandFailure`.
pub(crate) async fn run_checked(
    session: &dyn RemoteSession,
    command: &str,
    timeout: Duration,
) -> Result<ExecOutput, OrchestratorError> {
    let output = session.exec(command, timeout).await?;
    if !output.success() {
        return Err(OrchestratorError::command_failure(command, &output));
    }
    Ok(output)
}

/// Trim, lowercase and strip the trailing dot, then check hostname syntax.
pub fn normalize_domain(raw: &str) -> Result<String, OrchestratorError> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    let invalid = |why: &str| OrchestratorError::InvalidInput(format!("invalid domain {raw:?}: {why}"));

    if domain.is_empty() || domain.len() > 253 {
        return Err(invalid("length must be 1-253"));
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid("needs at least two labels"));
    }
    for label in labels {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid("label length must be 1-63"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("label cannot start or end with '-'"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("only letters, digits and '-' are allowed"));
        }
    }
    Ok(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(" Shop.Example.COM. ", "shop.example.com")]
    #[case("a-b.c1.io", "a-b.c1.io")]
    fn test_normalize_domain(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_domain(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("localhost")]
    #[case("-bad.example.com")]
    #[case("bad..example.com")]
    #[case("shop.example.com; rm -rf /")]
    #[case("under_score.example.com")]
    fn test_rejects_invalid_domains(#[case] raw: &str) {
        assert!(matches!(normalize_domain(raw), Err(OrchestratorError::InvalidInput(_))));
    }

    #[test]
    fn test_layout_paths() {
        let layout = RemoteLayout::new("/srv/apps/");
        let id = WorkloadId::new();
        assert_eq!(layout.workload_dir(id), format!("/srv/apps/{}", id.slug()));
        assert_eq!(layout.caddyfile_path(), "/srv/apps/caddy/Caddyfile");
    }
}
