//! Host records.

use std::path::PathBuf;

use appz_id::HostId;
use appz_remote::HostTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RAM_PERCENT: f64 = 80.0;
pub const DEFAULT_MAX_CPU_PERCENT: f64 = 80.0;

/// Host lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Active,
    Maintenance,
    Decommissioned,
}

/// RAM (GB), CPU (cores) and storage (GB) of a host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub ram_gb: f64,
    pub cpu_cores: f64,
    pub storage_gb: f64,
}

impl Resources {
    pub const fn new(ram_gb: f64, cpu_cores: f64, storage_gb: f64) -> Self {
        Self {
            ram_gb,
            cpu_cores,
            storage_gb,
        }
    }
}

/// A provisioned machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Private key for this host. Falls back to the configured default.
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_server_id: Option<String>,
    pub status: HostStatus,

    pub capacity: Resources,
    /// Refreshed from assigned workloads, never edited directly.
    #[serde(default)]
    pub usage: Resources,
    pub max_ram_percent: f64,
    pub max_cpu_percent: f64,
    #[serde(default)]
    pub service_count: u32,
    #[serde(default)]
    pub capacity_percent: f64,

    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn default_ssh_port() -> u16 {
    22
}

impl Host {
    /// A new active host with default ceilings and no usage.
    pub fn new(name: impl Into<String>, address: impl Into<String>, capacity: Resources) -> Self {
        Self {
            id: HostId::new(),
            name: name.into(),
            address: address.into(),
            ssh_port: default_ssh_port(),
            ssh_key: None,
            provider: None,
            provider_server_id: None,
            status: HostStatus::Active,
            capacity,
            usage: Resources::default(),
            max_ram_percent: DEFAULT_MAX_RAM_PERCENT,
            max_cpu_percent: DEFAULT_MAX_CPU_PERCENT,
            service_count: 0,
            capacity_percent: 0.0,
            last_health_check: None,
            created_at: Utc::now(),
        }
    }

    /// Override the utilisation ceilings.
    pub fn with_ceilings(mut self, max_ram_percent: f64, max_cpu_percent: f64) -> Self {
        self.max_ram_percent = max_ram_percent;
        self.max_cpu_percent = max_cpu_percent;
        self
    }

    /// Remote execution target for this host.
    pub fn target(&self, user: &str, default_key: Option<&PathBuf>) -> HostTarget {
        let target = HostTarget::new(self.id, self.address.clone(), user).with_port(self.ssh_port);
        match self.ssh_key.as_ref().or(default_key) {
            Some(key) => target.with_identity_file(key.clone()),
            None => target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_prefers_host_key() {
        let default_key = PathBuf::from("/etc/appz/id_ed25519");
        let mut host = Host::new("fsn1-01", "203.0.113.4", Resources::new(8.0, 4.0, 80.0));

        let target = host.target("root", Some(&default_key));
        assert_eq!(target.identity_file.as_ref(), Some(&default_key));

        host.ssh_key = Some(PathBuf::from("/keys/fsn1-01"));
        let target = host.target("root", Some(&default_key));
        assert_eq!(target.identity_file, Some(PathBuf::from("/keys/fsn1-01")));
        assert_eq!(target.host_id, host.id);
    }
}
