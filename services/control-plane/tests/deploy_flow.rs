//! Deployment and lifecycle flows against a scripted remote host.

use std::sync::Arc;

use appz_control_plane::deploy::{DeployOrchestrator, DeploySettings};
use appz_control_plane::error::OrchestratorError;
use appz_control_plane::locks::HostLocks;
use appz_control_plane::model::{
    BackupFrequency, Footprint, Host, Resources, Template, Workload, WorkloadStatus,
};
use appz_control_plane::secrets::{Credentials, MasterKey};
use appz_control_plane::store::{InMemoryStore, RecordStore};
use appz_remote::mock::MockConnector;
use appz_remote::ExecOutput;

struct Harness {
    store: Arc<InMemoryStore>,
    mock: MockConnector,
    deploy: Arc<DeployOrchestrator>,
    master_key: Arc<MasterKey>,
    host: Host,
    template: Template,
}

async fn harness(capacity: Resources) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let mock = MockConnector::new();
    let host = Host::new("fsn1-01", "203.0.113.10", capacity);
    store.save_host(&host).await.unwrap();

    let template = Template::new(
        "wordpress",
        Footprint::new(512.0, 0.5, 5.0),
        Footprint::new(1024.0, 1.0, 10.0),
        80,
    );
    store.save_template(&template).await.unwrap();

    let master_key = Arc::new(MasterKey::generate());
    let deploy = DeployOrchestrator::new(
        store.clone(),
        Arc::new(mock.clone()),
        Arc::new(HostLocks::new()),
        Arc::clone(&master_key),
        DeploySettings::default(),
    )
    .with_backup_bucket("appz-backups");
    Harness {
        store,
        mock,
        deploy: Arc::new(deploy),
        master_key,
        host,
        template,
    }
}

async fn pending(h: &Harness, domain: &str) -> Workload {
    let workload = Workload::new("acme", h.template.id, domain);
    h.store.save_workload(&workload).await.unwrap();
    workload
}

fn compose_path(workload: &Workload) -> String {
    format!("/apps/{}/docker-compose.yml", workload.id.slug())
}

#[tokio::test]
async fn test_deploy_places_renders_and_routes() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "Blog.Example.com.").await;

    let outcome = h.deploy.deploy(workload.id).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.error);
    let report = outcome.data.unwrap();
    assert_eq!(report.host_id, h.host.id);
    assert_eq!(report.domain, "blog.example.com");
    assert_eq!(report.services, ["app", "db"]);

    let stored = h.store.get_workload(workload.id).await.unwrap();
    assert_eq!(stored.status, WorkloadStatus::Active);
    assert_eq!(stored.host_id, Some(h.host.id));
    assert!(stored.credentials.is_some());
    assert!(stored.deployed_at.is_some());

    let slug = workload.id.slug();
    let compose = h.mock.file_string(&compose_path(&workload)).unwrap();
    assert!(compose.contains(&format!("container_name: {slug}-app")));
    assert!(compose.contains("memory: 1024M"));
    assert!(!compose.contains("{{"));
    assert_eq!(stored.rendered_topology.as_deref(), Some(compose.as_str()));

    let caddyfile = h.mock.file_string("/apps/caddy/Caddyfile").unwrap();
    assert!(caddyfile.contains("blog.example.com {"));
    assert!(caddyfile.contains(&format!("reverse_proxy {slug}-app:80")));
    assert!(h.mock.ran("caddy reload"));

    let host = h.store.get_host(h.host.id).await.unwrap();
    assert_eq!(host.service_count, 1);
    assert_eq!(host.usage.ram_gb, 0.5);
    assert_eq!(h.mock.closed_count(), 1);
}

#[tokio::test]
async fn test_failed_deploy_marks_error_and_retry_keeps_credentials() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "shop.example.com").await;
    h.mock
        .respond("docker compose up -d", ExecOutput::failed(1, "pull access denied"));

    let outcome = h.deploy.deploy(workload.id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.code.as_deref(), Some("command_failure"));

    let failed = h.store.get_workload(workload.id).await.unwrap();
    assert_eq!(failed.status, WorkloadStatus::Error);
    assert!(failed.last_error.as_deref().unwrap().contains("pull access denied"));
    assert!(failed.error_at.is_some());
    let first_compose = h.mock.file_string(&compose_path(&workload)).unwrap();

    let host = h.store.get_host(h.host.id).await.unwrap();
    assert_eq!(host.service_count, 0);

    h.mock.respond("docker compose up -d", ExecOutput::ok(""));
    let outcome = h.deploy.deploy(workload.id).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.error);

    let active = h.store.get_workload(workload.id).await.unwrap();
    assert_eq!(active.status, WorkloadStatus::Active);
    assert_eq!(active.last_error, None);
    assert_eq!(active.credentials, failed.credentials);
    assert_eq!(h.mock.file_string(&compose_path(&workload)).unwrap(), first_compose);
}

#[tokio::test]
async fn test_no_capacity_is_raised_before_any_mutation() {
    let h = harness(Resources::new(0.5, 4.0, 80.0)).await;
    let workload = pending(&h, "big.example.com").await;

    let err = h.deploy.deploy(workload.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NoCapacity(_)));

    let stored = h.store.get_workload(workload.id).await.unwrap();
    assert_eq!(stored, workload);
    assert_eq!(h.mock.connect_count(), 0);
    assert!(h.mock.commands().is_empty());
}

#[tokio::test]
async fn test_invalid_domain_is_rejected() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "not a domain").await;

    let err = h.deploy.deploy(workload.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidInput(_)));
    assert_eq!(h.store.get_workload(workload.id).await.unwrap().status, WorkloadStatus::Pending);
}

#[tokio::test]
async fn test_concurrent_deploys_never_oversubscribe() {
    // Room for exactly one wordpress under the 80% RAM ceiling.
    let h = harness(Resources::new(1.0, 4.0, 80.0)).await;
    let a = pending(&h, "a.example.com").await;
    let b = pending(&h, "b.example.com").await;

    let (ra, rb) = tokio::join!(h.deploy.deploy(a.id), h.deploy.deploy(b.id));
    let results = [ra, rb];
    let placed = results.iter().filter(|r| matches!(r, Ok(o) if o.success)).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(OrchestratorError::NoCapacity(_))))
        .count();
    assert_eq!((placed, rejected), (1, 1));

    let host = h.store.get_host(h.host.id).await.unwrap();
    assert_eq!(host.service_count, 1);
}

#[tokio::test]
async fn test_lifecycle_transitions() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "app.example.com").await;
    assert!(h.deploy.deploy(workload.id).await.unwrap().success);

    let outcome = h.deploy.stop(workload.id).await.unwrap();
    assert_eq!(outcome.data, Some(WorkloadStatus::Suspended));
    assert!(h.mock.ran("docker compose down"));
    let caddyfile = h.mock.file_string("/apps/caddy/Caddyfile").unwrap();
    assert!(!caddyfile.contains("app.example.com"));
    assert_eq!(h.store.get_host(h.host.id).await.unwrap().service_count, 0);

    let err = h.deploy.restart(workload.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidState(_)));

    let outcome = h.deploy.start(workload.id).await.unwrap();
    assert_eq!(outcome.data, Some(WorkloadStatus::Active));
    let caddyfile = h.mock.file_string("/apps/caddy/Caddyfile").unwrap();
    assert!(caddyfile.contains("app.example.com {"));

    let outcome = h.deploy.restart(workload.id).await.unwrap();
    assert_eq!(outcome.data, Some(WorkloadStatus::Active));
    assert!(h.mock.ran("docker compose restart"));

    let outcome = h.deploy.remove(workload.id).await.unwrap();
    assert_eq!(outcome.data, Some(WorkloadStatus::Removed));
    assert!(h.mock.ran("docker compose down -v"));
    assert!(h.mock.ran(&format!("rm -rf /apps/{}", workload.id.slug())));
    assert_eq!(h.store.get_workload(workload.id).await.unwrap().status, WorkloadStatus::Removed);
}

#[tokio::test]
async fn test_failed_stop_keeps_status() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "app.example.com").await;
    assert!(h.deploy.deploy(workload.id).await.unwrap().success);

    h.mock.respond("docker compose down", ExecOutput::failed(1, "daemon not running"));
    let outcome = h.deploy.stop(workload.id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(h.store.get_workload(workload.id).await.unwrap().status, WorkloadStatus::Active);
}

#[tokio::test]
async fn test_failed_start_marks_error() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "app.example.com").await;
    assert!(h.deploy.deploy(workload.id).await.unwrap().success);
    assert!(h.deploy.stop(workload.id).await.unwrap().success);

    h.mock
        .respond("docker compose up -d", ExecOutput::failed(1, "port is already allocated"));
    let outcome = h.deploy.start(workload.id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.code.as_deref(), Some("command_failure"));

    let stored = h.store.get_workload(workload.id).await.unwrap();
    assert_eq!(stored.status, WorkloadStatus::Error);
    assert!(stored.last_error.as_deref().unwrap().contains("port is already allocated"));
    assert!(stored.error_at.is_some());
    assert_eq!(h.store.get_host(h.host.id).await.unwrap().service_count, 0);

    // Error can be redeployed in place.
    h.mock.respond("docker compose up -d", ExecOutput::ok(""));
    assert!(h.deploy.deploy(workload.id).await.unwrap().success);
    assert_eq!(h.store.get_workload(workload.id).await.unwrap().status, WorkloadStatus::Active);
}

#[tokio::test]
async fn test_retry_after_host_filled_up_is_rejected() {
    // Room for exactly one wordpress under the 80% RAM ceiling.
    let h = harness(Resources::new(1.0, 4.0, 80.0)).await;
    let first = pending(&h, "first.example.com").await;
    h.mock.respond("docker compose up -d", ExecOutput::failed(1, "pull access denied"));
    assert!(!h.deploy.deploy(first.id).await.unwrap().success);

    h.mock.respond("docker compose up -d", ExecOutput::ok(""));
    let second = pending(&h, "second.example.com").await;
    assert!(h.deploy.deploy(second.id).await.unwrap().success);

    let err = h.deploy.deploy(first.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NoCapacity(_)));

    let stored = h.store.get_workload(first.id).await.unwrap();
    assert_eq!(stored.status, WorkloadStatus::Error);
    let host = h.store.get_host(h.host.id).await.unwrap();
    assert_eq!(host.service_count, 1);
    assert!(host.capacity_percent <= host.max_ram_percent);
}

#[tokio::test]
async fn test_deploy_enables_requested_add_ons() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let mut workload = Workload::new("acme", h.template.id, "addons.example.com");
    workload.backup_enabled = true;
    workload.observability_enabled = true;
    h.store.save_workload(&workload).await.unwrap();

    let outcome = h.deploy.deploy(workload.id).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.error);

    let config = h
        .store
        .backup_config_for_workload(workload.id)
        .await
        .unwrap()
        .expect("backup config created on deploy");
    assert!(config.enabled);
    assert_eq!(config.frequency, BackupFrequency::Daily);
    assert_eq!(config.backup_time, "03:00");
    assert_eq!(config.retention_days, 30);
    assert_eq!(config.bucket, "appz-backups");

    let stored = h.store.get_workload(workload.id).await.unwrap();
    assert!(stored.observability.unwrap().enabled);
    assert!(h.mock.ran("docker compose up -d otel-collector"));
}

#[tokio::test]
async fn test_deploy_without_add_ons_creates_nothing() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "plain.example.com").await;
    assert!(h.deploy.deploy(workload.id).await.unwrap().success);

    assert!(h.store.backup_config_for_workload(workload.id).await.unwrap().is_none());
    assert!(h.store.get_workload(workload.id).await.unwrap().observability.is_none());
    assert!(!h.mock.ran("otel-collector"));
}

#[tokio::test]
async fn test_failed_collector_does_not_fail_deploy() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let mut workload = Workload::new("acme", h.template.id, "obs.example.com");
    workload.observability_enabled = true;
    h.store.save_workload(&workload).await.unwrap();
    h.mock.respond(
        "docker compose up -d otel-collector",
        ExecOutput::failed(1, "image not found"),
    );

    let outcome = h.deploy.deploy(workload.id).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.error);

    let stored = h.store.get_workload(workload.id).await.unwrap();
    assert_eq!(stored.status, WorkloadStatus::Active);
    assert!(stored.observability.is_none());
}

#[tokio::test]
async fn test_sealed_secrets_appear_verbatim_in_compose() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let n8n = Template::new(
        "n8n",
        Footprint::new(512.0, 0.25, 5.0),
        Footprint::new(1024.0, 0.5, 10.0),
        5678,
    );
    h.store.save_template(&n8n).await.unwrap();
    let automation = Workload::new("acme", n8n.id, "flows.example.com");
    h.store.save_workload(&automation).await.unwrap();
    let blog = pending(&h, "blog.example.com").await;

    assert!(h.deploy.deploy(automation.id).await.unwrap().success);
    assert!(h.deploy.deploy(blog.id).await.unwrap().success);

    let open = |workload: &Workload| {
        let stored = workload.credentials.as_ref().unwrap();
        Credentials::open(&h.master_key, stored, &workload.credentials_aad()).unwrap()
    };

    let stored = h.store.get_workload(automation.id).await.unwrap();
    let secrets = open(&stored);
    let compose = h.mock.file_string(&compose_path(&stored)).unwrap();
    assert!(compose.contains(&format!("N8N_ENCRYPTION_KEY={}\n", secrets.encryption_key)));
    assert!(compose.contains(&format!("DB_POSTGRESDB_PASSWORD={}\n", secrets.db_password)));
    assert!(compose.contains(&format!("POSTGRES_PASSWORD: {}\n", secrets.db_password)));

    let stored = h.store.get_workload(blog.id).await.unwrap();
    let secrets = open(&stored);
    let compose = h.mock.file_string(&compose_path(&stored)).unwrap();
    assert!(compose.contains(&format!("MYSQL_ROOT_PASSWORD: {}\n", secrets.db_root_password)));
    assert!(compose.contains(&format!("WORDPRESS_DB_PASSWORD: {}\n", secrets.db_password)));
}

#[tokio::test]
async fn test_proxy_reload_failure_does_not_fail_deploy() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "app.example.com").await;
    h.mock.respond("caddy reload", ExecOutput::failed(1, "no such container"));

    let outcome = h.deploy.deploy(workload.id).await.unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn test_timeout_reports_failure() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "slow.example.com").await;
    h.mock.timeout_on("docker compose up -d");

    let outcome = h.deploy.deploy(workload.id).await.unwrap();
    assert_eq!(outcome.code.as_deref(), Some("timeout"));
    assert_eq!(h.store.get_workload(workload.id).await.unwrap().status, WorkloadStatus::Error);
}

#[tokio::test]
async fn test_setup_host_tolerates_existing_network() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    h.mock.respond(
        "docker network create",
        ExecOutput::failed(1, "network with name appz-network already exists"),
    );

    let outcome = h.deploy.setup_host(h.host.id).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.error);
    let compose = h.mock.file_string("/apps/caddy/docker-compose.yml").unwrap();
    assert!(compose.contains("/apps/caddy/Caddyfile"));
    assert!(h.mock.file_string("/apps/caddy/Caddyfile").is_some());
}

#[tokio::test]
async fn test_observability_add_on() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "obs.example.com").await;
    assert!(h.deploy.deploy(workload.id).await.unwrap().success);

    let outcome = h.deploy.enable_observability(workload.id).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.error);
    let state = outcome.data.unwrap();
    assert!(state.enabled);
    assert_eq!(state.tenant_id.len(), 16);
    assert!(state.dashboard_url.contains(&workload.id.slug()));

    let compose = h.mock.file_string(&compose_path(&workload)).unwrap();
    assert!(compose.contains("otel-collector"));
    assert!(h.mock.ran("docker compose up -d otel-collector"));
    let config = h
        .mock
        .file_string(&format!("/apps/{}/otel-config.yaml", workload.id.slug()))
        .unwrap();
    assert!(config.contains(&state.tenant_id));

    let outcome = h.deploy.disable_observability(workload.id).await.unwrap();
    assert!(outcome.success);
    let compose = h.mock.file_string(&compose_path(&workload)).unwrap();
    assert!(!compose.contains("otel-collector"));
    let stored = h.store.get_workload(workload.id).await.unwrap();
    assert!(!stored.observability.unwrap().enabled);
}

#[tokio::test]
async fn test_logs_and_stats() {
    let h = harness(Resources::new(8.0, 4.0, 80.0)).await;
    let workload = pending(&h, "app.example.com").await;
    assert!(h.deploy.deploy(workload.id).await.unwrap().success);

    h.mock.respond("docker compose logs", ExecOutput::ok("app-1  | ready\n"));
    h.mock.respond(
        "docker stats",
        ExecOutput::ok("a-app|256MiB / 1GiB|12.50%\na-db|256MiB / 1GiB|2.50%\n"),
    );

    let logs = h.deploy.logs(workload.id, 50_000).await.unwrap();
    assert_eq!(logs, "app-1  | ready\n");
    assert!(h.mock.ran("--tail 10000"));

    let stats = h.deploy.stats(workload.id).await.unwrap();
    assert_eq!(stats.memory_mb, 512.0);
    assert_eq!(stats.cpu_percent, 15.0);
}
