use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::deploy::{DeploySettings, RemoteLayout};
use crate::providers::{ProviderConfig, ProviderKind};
use crate::storage::StorageConfig;

const DEFAULT_BUCKET: &str = "appz-backups";

/// Where the secrets master key comes from.
#[derive(Debug, Clone)]
pub enum MasterKeySource {
    Base64(String),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub deploy: DeploySettings,
    pub ssh_connect_timeout: Duration,
    pub storage: StorageConfig,
    pub provider: Option<ProviderConfig>,
    pub master_key: Option<MasterKeySource>,
    pub backup_interval: Duration,
    pub monitor_interval: Duration,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn secs(name: &str, default: u64) -> Result<Duration> {
    match var(name) {
        Some(raw) => {
            let secs: u64 = raw.parse().with_context(|| format!("{name} must be a number of seconds"))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(Duration::from_secs(default)),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("APPZ_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("APPZ_LISTEN_ADDR must be host:port")?;

        let log_level = std::env::var("APPZ_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = DeploySettings::default();
        let deploy = DeploySettings {
            layout: var("APPZ_APPS_ROOT").map(RemoteLayout::new).unwrap_or_default(),
            ssh_user: var("APPZ_SSH_USER").unwrap_or(defaults.ssh_user),
            ssh_key: var("APPZ_SSH_KEY").map(PathBuf::from),
            otel_endpoint: var("APPZ_OTEL_ENDPOINT").unwrap_or(defaults.otel_endpoint),
            grafana_url: var("APPZ_GRAFANA_URL").unwrap_or(defaults.grafana_url),
        };

        let storage = StorageConfig {
            endpoint: var("APPZ_S3_ENDPOINT"),
            access_key: var("APPZ_S3_ACCESS_KEY"),
            secret_key: var("APPZ_S3_SECRET_KEY"),
            bucket: var("APPZ_S3_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            region: var("APPZ_S3_REGION"),
        };

        let provider = match var("APPZ_PROVIDER") {
            Some(raw) => {
                let kind: ProviderKind = raw.parse().map_err(|e: String| anyhow!(e))?;
                Some(ProviderConfig {
                    kind,
                    api_key: var("APPZ_PROVIDER_API_KEY").context("APPZ_PROVIDER_API_KEY is required with APPZ_PROVIDER")?,
                    region: var("APPZ_PROVIDER_REGION"),
                    ssh_keys: var("APPZ_PROVIDER_SSH_KEYS")
                        .map(|keys| {
                            keys.split(',')
                                .map(str::trim)
                                .filter(|k| !k.is_empty())
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                })
            }
            None => None,
        };

        let master_key = var("APPZ_SECRETS_MASTER_KEY")
            .map(MasterKeySource::Base64)
            .or_else(|| var("APPZ_SECRETS_MASTER_KEY_FILE").map(|p| MasterKeySource::File(PathBuf::from(p))));

        Ok(Self {
            listen_addr,
            log_level,
            deploy,
            ssh_connect_timeout: secs("APPZ_SSH_CONNECT_TIMEOUT_SECS", 30)?,
            storage,
            provider,
            master_key,
            backup_interval: secs("APPZ_BACKUP_INTERVAL_SECS", 3600)?,
            monitor_interval: secs("APPZ_MONITOR_INTERVAL_SECS", 86_400)?,
        })
    }
}
