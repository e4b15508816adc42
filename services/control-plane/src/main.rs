//! appz control plane
//!
//! Serves the HTTP API for hosts, templates, workloads and backups, and
//! runs the backup scheduler and resource monitor in the background.

use std::sync::Arc;

use anyhow::{Context, Result};
use appz_control_plane::{
    api,
    config::{self, MasterKeySource},
    secrets::MasterKey,
    state::AppState,
    storage::ObjectStorage,
    store::InMemoryStore,
    workers::{BackupScheduler, MonitorWorker},
};
use appz_remote::SshConnector;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn load_master_key(source: Option<&MasterKeySource>) -> Result<MasterKey> {
    match source {
        Some(MasterKeySource::Base64(raw)) => {
            MasterKey::from_base64(raw).context("APPZ_SECRETS_MASTER_KEY is not a valid key")
        }
        Some(MasterKeySource::File(path)) => MasterKey::from_file(path)
            .with_context(|| format!("failed to read master key from {}", path.display())),
        None => {
            warn!("No secrets master key configured; using an ephemeral key, sealed credentials will not survive a restart");
            Ok(MasterKey::generate())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to APPZ_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting appz control plane");
    info!(
        listen_addr = %config.listen_addr,
        apps_root = config.deploy.layout.apps_root(),
        bucket = %config.storage.bucket,
        "Configuration loaded"
    );

    let master_key = Arc::new(load_master_key(config.master_key.as_ref())?);
    let storage = Arc::new(ObjectStorage::from_config(&config.storage).context("failed to configure object storage")?);
    let provider = match &config.provider {
        Some(provider_config) => {
            let provider = provider_config.build().context("failed to configure cloud provider")?;
            info!(provider = provider.name(), "Cloud provider configured");
            Some(provider)
        }
        None => None,
    };

    let store = Arc::new(InMemoryStore::new());
    let connector = Arc::new(SshConnector::new(config.ssh_connect_timeout));
    let state = AppState::new(store, connector, storage, master_key, config.deploy.clone(), provider)
        .context("failed to build application state")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let backup_scheduler = BackupScheduler::new(state.store_handle(), state.backups(), config.backup_interval);
    let backup_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            backup_scheduler.run(shutdown_rx).await;
        }
    });

    let monitor_worker = MonitorWorker::new(state.monitor(), config.monitor_interval);
    let monitor_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            monitor_worker.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, backup_handle).await {
        warn!(error = %e, "Backup scheduler did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, monitor_handle).await {
        warn!(error = %e, "Monitor worker did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
