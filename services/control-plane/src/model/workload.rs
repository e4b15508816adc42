//! Workloads: deployed service instances.

use appz_id::{HostId, TemplateId, WorkloadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Footprint;
use crate::secrets::EncryptedCredentials;

/// Workload lifecycle.
///
/// `Pending -> Provisioning -> Active <-> Suspended -> Removed`, with `Error`
/// reachable from any deployment or start attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Pending,
    Provisioning,
    Active,
    Suspended,
    Removed,
    Error,
}

impl WorkloadStatus {
    /// Whether the workload's footprint is charged to its host.
    pub fn counts_toward_usage(self) -> bool {
        matches!(self, Self::Active | Self::Provisioning)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Removed => "removed",
            Self::Error => "error",
        }
    }
}

/// Observability add-on state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observability {
    pub enabled: bool,
    pub tenant_id: String,
    pub dashboard_url: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    pub customer: String,
    #[serde(default)]
    pub host_id: Option<HostId>,
    pub template_id: TemplateId,
    pub domain: String,
    pub status: WorkloadStatus,

    /// Last measured usage. Overrides the template estimate when present.
    #[serde(default)]
    pub measured: Option<Footprint>,
    #[serde(default)]
    pub measured_cpu_percent: Option<f64>,

    /// Topology as last deployed.
    #[serde(default)]
    pub rendered_topology: Option<String>,
    #[serde(default)]
    pub credentials: Option<EncryptedCredentials>,
    #[serde(default)]
    pub observability: Option<Observability>,
    /// Create a default backup configuration once deployed.
    #[serde(default)]
    pub backup_enabled: bool,
    /// Attach the telemetry collector once deployed.
    #[serde(default)]
    pub observability_enabled: bool,

    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub error_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Workload {
    pub fn new(customer: impl Into<String>, template_id: TemplateId, domain: impl Into<String>) -> Self {
        Self {
            id: WorkloadId::new(),
            customer: customer.into(),
            host_id: None,
            template_id,
            domain: domain.into(),
            status: WorkloadStatus::Pending,
            measured: None,
            measured_cpu_percent: None,
            rendered_topology: None,
            credentials: None,
            observability: None,
            backup_enabled: false,
            observability_enabled: false,
            last_error: None,
            error_at: None,
            deployed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Associated data binding sealed credentials to this workload.
    pub fn credentials_aad(&self) -> Vec<u8> {
        self.id.to_string().into_bytes()
    }

    /// Record a failed attempt.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = WorkloadStatus::Error;
        self.last_error = Some(message.into());
        self.error_at = Some(Utc::now());
    }
}
