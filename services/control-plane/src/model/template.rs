//! Deployment templates.

use appz_id::TemplateId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Footprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Testing,
    Tested,
}

/// A parameterised multi-container topology plus resource estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    /// Catalog name, e.g. `wordpress`. Selects built-in topologies and
    /// resource estimates.
    pub name: String,
    pub status: TemplateStatus,
    /// Compose text with `{{ NAME }}` placeholders. `None` uses the
    /// built-in topology for `name`.
    #[serde(default)]
    pub topology: Option<String>,
    pub min: Footprint,
    pub recommended: Footprint,
    #[serde(default = "default_healthcheck_path")]
    pub healthcheck_path: String,
    /// Port the `app` container listens on inside the proxy network.
    pub app_port: u16,
    #[serde(default)]
    pub backup_script: Option<String>,
    #[serde(default)]
    pub restore_script: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_healthcheck_path() -> String {
    "/".to_string()
}

impl Template {
    pub fn new(name: impl Into<String>, min: Footprint, recommended: Footprint, app_port: u16) -> Self {
        Self {
            id: TemplateId::new(),
            name: name.into(),
            status: TemplateStatus::Draft,
            topology: None,
            min,
            recommended,
            healthcheck_path: default_healthcheck_path(),
            app_port,
            backup_script: None,
            restore_script: None,
            created_at: Utc::now(),
        }
    }

    /// Tested templates are frozen.
    pub fn is_mutable(&self) -> bool {
        self.status != TemplateStatus::Tested
    }
}
