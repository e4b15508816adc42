//! Cloud providers that can create and destroy hosts.

mod hetzner;
mod vultr;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use appz_id::HostId;

use crate::error::OrchestratorError;
use crate::locks::HostLocks;
use crate::model::{Host, HostStatus, Resources, WorkloadStatus};
use crate::store::RecordStore;

pub use hetzner::HetznerProvider;
pub use vultr::VultrProvider;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider API key is not configured")]
    MissingApiKey,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

/// Parameters for a new server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub name: String,
    /// Provider-specific size; each provider has its own default.
    #[serde(default)]
    pub server_type: Option<String>,
    /// Resources of the requested size, recorded on the host.
    pub capacity: Resources,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedServer {
    pub server_id: String,
    pub address: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedServer, ProviderError>;

    async fn destroy(&self, server_id: &str) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Hetzner,
    Vultr,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hetzner" => Ok(Self::Hetzner),
            "vultr" => Ok(Self::Vultr),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Provider selection, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub region: Option<String>,
    pub ssh_keys: Vec<String>,
}

impl ProviderConfig {
    pub fn build(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::MissingApiKey);
        }
        let provider: Arc<dyn Provider> = match self.kind {
            ProviderKind::Hetzner => {
                let mut p = HetznerProvider::new(self.api_key.clone())?.with_ssh_keys(self.ssh_keys.clone());
                if let Some(region) = &self.region {
                    p = p.with_location(region.clone());
                }
                Arc::new(p)
            }
            ProviderKind::Vultr => {
                let mut p = VultrProvider::new(self.api_key.clone())?;
                if let Some(region) = &self.region {
                    p = p.with_region(region.clone());
                }
                Arc::new(p)
            }
        };
        Ok(provider)
    }
}

fn http_client() -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

async fn unexpected(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ProviderError::UnexpectedStatus { status, body }
}

/// Create a server and register it as an Active host.
///
/// Nothing is written if the provider call fails.
pub async fn provision_host(
    provider: &dyn Provider,
    store: &dyn RecordStore,
    request: &ProvisionRequest,
) -> Result<Host, OrchestratorError> {
    let server = match provider.provision(request).await {
        Ok(server) => server,
        Err(e) => {
            warn!(provider = provider.name(), name = %request.name, error = %e, "Provisioning failed");
            return Err(e.into());
        }
    };

    let mut host = Host::new(request.name.clone(), server.address, request.capacity);
    host.provider = Some(provider.name().to_string());
    host.provider_server_id = Some(server.server_id);
    store.save_host(&host).await?;

    info!(host_id = %host.id, provider = provider.name(), address = %host.address, "Provisioned host");
    Ok(host)
}

/// Destroy a host's server and mark it `Decommissioned`.
///
/// Refused with `InvalidState` while any workload other than `Removed` is
/// assigned to the host. Hosts registered by hand have no server to
/// destroy and are only marked. The record is kept either way, and nothing
/// is written if the provider call fails.
pub async fn decommission_host(
    provider: Option<&dyn Provider>,
    store: &dyn RecordStore,
    locks: &HostLocks,
    host_id: HostId,
) -> Result<Host, OrchestratorError> {
    let _guard = locks.lock(host_id).await;
    let mut host = store.get_host(host_id).await?;
    if host.status == HostStatus::Decommissioned {
        return Err(OrchestratorError::InvalidState(format!("host {host_id} is already decommissioned")));
    }

    let remaining = store
        .list_workloads_on_host(host_id)
        .await?
        .iter()
        .filter(|w| w.status != WorkloadStatus::Removed)
        .count();
    if remaining > 0 {
        return Err(OrchestratorError::InvalidState(format!(
            "host {host_id} still has {remaining} workload(s)"
        )));
    }

    if let Some(server_id) = &host.provider_server_id {
        let provider = provider.ok_or_else(|| {
            OrchestratorError::ConfigurationMissing(format!("no provider configured to destroy server {server_id}"))
        })?;
        if host.provider.as_deref().is_some_and(|name| name != provider.name()) {
            return Err(OrchestratorError::ConfigurationMissing(format!(
                "host {host_id} was provisioned by another provider"
            )));
        }
        if let Err(e) = provider.destroy(server_id).await {
            warn!(provider = provider.name(), host_id = %host_id, error = %e, "Destroying server failed");
            return Err(e.into());
        }
    }

    host.status = HostStatus::Decommissioned;
    store.save_host(&host).await?;
    info!(host_id = %host_id, "Decommissioned host");
    Ok(host)
}
