//! Backup, restore and retention flows against a scripted host and an
//! in-memory bucket.

use std::sync::Arc;

use appz_control_plane::backup::BackupOrchestrator;
use appz_control_plane::deploy::DeploySettings;
use appz_control_plane::error::OrchestratorError;
use appz_control_plane::locks::HostLocks;
use appz_control_plane::model::{
    BackupConfig, BackupRecord, BackupStatus, Footprint, Host, LastBackupStatus, Resources, Template, Workload,
    WorkloadStatus,
};
use appz_control_plane::secrets::{Credentials, MasterKey};
use appz_control_plane::storage::ObjectStorage;
use appz_control_plane::store::{InMemoryStore, RecordStore};
use appz_control_plane::workers::BackupScheduler;
use appz_remote::mock::MockConnector;
use appz_remote::{ExecOutput, BACKUP_TIMEOUT};
use chrono::{Duration, TimeZone, Utc};

const BUCKET: &str = "appz-backups";

struct Harness {
    store: Arc<InMemoryStore>,
    mock: MockConnector,
    storage: Arc<ObjectStorage>,
    backups: Arc<BackupOrchestrator>,
    workload: Workload,
    credentials: Credentials,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let mock = MockConnector::new();
    let storage = Arc::new(ObjectStorage::in_memory(BUCKET));
    let master_key = Arc::new(MasterKey::generate());

    let host = Host::new("fsn1-01", "203.0.113.20", Resources::new(8.0, 4.0, 80.0));
    store.save_host(&host).await.unwrap();
    let template = Template::new("wordpress", Footprint::new(512.0, 0.5, 5.0), Footprint::new(1024.0, 1.0, 10.0), 80);
    store.save_template(&template).await.unwrap();

    let credentials = Credentials::generate();
    let mut workload = Workload::new("acme", template.id, "blog.example.com");
    workload.host_id = Some(host.id);
    workload.status = WorkloadStatus::Active;
    workload.credentials = Some(credentials.seal(&master_key, &workload.credentials_aad()).unwrap());
    store.save_workload(&workload).await.unwrap();

    let backups = BackupOrchestrator::new(
        store.clone(),
        Arc::new(mock.clone()),
        Arc::new(HostLocks::new()),
        storage.clone(),
        master_key,
        DeploySettings::default(),
    );
    Harness {
        store,
        mock,
        storage,
        backups: Arc::new(backups),
        workload,
        credentials,
    }
}

async fn configure(h: &Harness) -> BackupConfig {
    let config = BackupConfig::default_for(h.workload.id, BUCKET);
    h.store.save_backup_config(&config).await.unwrap();
    config
}

fn stage_artifacts(mock: &MockConnector) {
    mock.respond("ls -1", ExecOutput::ok("data.tar.gz\ndatabase.sql\nmanifest.json\n"));
    mock.respond("du -sm", ExecOutput::ok("42\n"));
    mock.put_file("*/data.tar.gz", b"tarball".to_vec());
    mock.put_file("*/database.sql", b"create table posts;".to_vec());
    mock.put_file("*/manifest.json", b"{}".to_vec());
}

#[tokio::test]
async fn test_backup_uploads_artifacts_and_completes() {
    let h = harness().await;
    configure(&h).await;
    stage_artifacts(&h.mock);

    let outcome = h.backups.run_backup(h.workload.id).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.error);
    let record = outcome.data.unwrap();

    assert_eq!(record.status, BackupStatus::Completed);
    assert!(record.can_restore);
    assert_eq!(record.size_mb, 42);
    assert_eq!(record.file_count, 3);
    let manifest = record.manifest.clone().unwrap();
    assert_eq!(manifest.files, ["data.tar.gz", "database.sql", "manifest.json"]);
    assert_eq!(manifest.template, "wordpress");

    let slug = h.workload.id.slug();
    let run = format!("{}-{}", manifest.timestamp, record.id.slug());
    let prefix = format!("services/{slug}/{run}");
    assert_eq!(record.location.as_deref(), Some(format!("s3://{BUCKET}/{prefix}/").as_str()));
    assert_eq!(h.storage.list(&prefix).await.unwrap().len(), 3);
    assert_eq!(h.store.get_backup(record.id).await.unwrap(), record);

    let config = h.store.backup_config_for_workload(h.workload.id).await.unwrap().unwrap();
    assert_eq!(config.total_backup_count, 1);
    assert_eq!(config.last_backup_status, Some(LastBackupStatus::Success));
    assert_eq!(config.last_backup_size_mb, 42);

    let staging = format!("/tmp/backups/{slug}-{run}");
    let script = h.mock.file_string(&format!("{staging}.sh")).unwrap();
    assert!(script.contains(&format!("export SERVICE_ID={slug}")));
    assert!(script.contains(&format!("export BACKUP_PATH={staging}")));
    assert!(script.contains("export DB_ROOT_PASSWORD="));
    assert!(script.contains("mysqldump"));

    let script_run = h
        .mock
        .records()
        .into_iter()
        .find(|r| r.command.starts_with("sh "))
        .unwrap();
    assert_eq!(script_run.timeout, BACKUP_TIMEOUT);
    assert!(h
        .mock
        .commands()
        .iter()
        .all(|c| !c.contains(&h.credentials.db_root_password)));
    assert!(h.mock.ran(&format!("rm -rf {staging} {staging}.sh")));
    assert_eq!(h.mock.closed_count(), 1);
}

#[tokio::test]
async fn test_back_to_back_backups_keep_separate_artifacts() {
    let h = harness().await;
    configure(&h).await;
    stage_artifacts(&h.mock);

    let first = h.backups.run_backup(h.workload.id).await.unwrap().data.unwrap();
    let second = h.backups.run_backup(h.workload.id).await.unwrap().data.unwrap();

    assert_ne!(first.location, second.location);
    let slug = h.workload.id.slug();
    assert_eq!(h.storage.list(&format!("services/{slug}")).await.unwrap().len(), 6);
    for record in [&first, &second] {
        let prefix = record.location.as_deref().unwrap();
        assert!(prefix.ends_with(&format!("-{}/", record.id.slug())), "{prefix}");
    }
}

#[tokio::test]
async fn test_partial_upload_leaves_one_failed_record_and_no_objects() {
    let h = harness().await;
    configure(&h).await;
    h.mock.respond("ls -1", ExecOutput::ok("data.tar.gz\ndatabase.sql\n"));
    h.mock.put_file("*/data.tar.gz", b"tarball".to_vec());

    let outcome = h.backups.run_backup(h.workload.id).await.unwrap();
    assert!(!outcome.success);
    let record = outcome.data.unwrap();
    assert_eq!(record.status, BackupStatus::Failed);
    assert!(record.error.is_some());
    assert!(record.manifest.is_none());
    assert!(!record.can_restore);

    let records = h.store.list_backups_for_workload(h.workload.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, BackupStatus::Failed);
    assert!(h.storage.list("services").await.unwrap().is_empty());

    let config = h.store.backup_config_for_workload(h.workload.id).await.unwrap().unwrap();
    assert_eq!(config.last_backup_status, Some(LastBackupStatus::Failed));
    assert_eq!(config.total_backup_count, 0);
    assert!(h.mock.ran("rm -rf /tmp/backups/"));
}

#[tokio::test]
async fn test_script_failure_marks_failed_without_leaking_secrets() {
    let h = harness().await;
    configure(&h).await;
    h.mock.respond("sh /tmp/backups/", ExecOutput::failed(2, "mysqldump: Got error: 1045"));

    let outcome = h.backups.run_backup(h.workload.id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.code.as_deref(), Some("command_failure"));

    let error = outcome.error.unwrap();
    assert!(error.contains("mysqldump: Got error: 1045"));
    assert!(!error.contains(&h.credentials.db_root_password));
    assert!(!h.mock.ran("ls -1"));
    assert!(h.storage.list("services").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_backup_without_configuration_is_rejected() {
    let h = harness().await;

    let err = h.backups.run_backup(h.workload.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ConfigurationMissing(_)));
    assert!(h.store.list_backups_for_workload(h.workload.id).await.unwrap().is_empty());
    assert_eq!(h.mock.connect_count(), 0);
}

#[tokio::test]
async fn test_template_script_replaces_generic() {
    let h = harness().await;
    configure(&h).await;
    stage_artifacts(&h.mock);
    let mut template = h.store.get_template(h.workload.template_id).await.unwrap();
    template.backup_script = Some("tar -czf \"$BACKUP_PATH/site.tgz\" -C \"$DATA_PATH\" .".into());
    h.store.save_template(&template).await.unwrap();

    let record = h.backups.run_backup(h.workload.id).await.unwrap().data.unwrap();
    let timestamp = record.manifest.unwrap().timestamp;
    let script = h
        .mock
        .file_string(&format!(
            "/tmp/backups/{}-{timestamp}-{}.sh",
            h.workload.id.slug(),
            record.id.slug()
        ))
        .unwrap();
    assert!(script.contains("site.tgz"));
    assert!(!script.contains("mysqldump"));
}

#[tokio::test]
async fn test_restore_relays_objects_back_to_host() {
    let h = harness().await;
    configure(&h).await;
    stage_artifacts(&h.mock);
    let record = h.backups.run_backup(h.workload.id).await.unwrap().data.unwrap();

    let outcome = h.backups.restore(record.id).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.error);

    let staging = format!("/tmp/restore/{}", record.id.slug());
    assert_eq!(h.mock.file(&format!("{staging}/data.tar.gz")).unwrap(), b"tarball");
    assert_eq!(
        h.mock.file(&format!("{staging}/database.sql")).unwrap(),
        b"create table posts;"
    );
    let script = h.mock.file_string(&format!("{staging}.sh")).unwrap();
    assert!(script.contains(&format!("export BACKUP_PATH={staging}")));
    assert!(script.contains("docker start"));
    assert!(h.mock.ran(&format!("sh {staging}.sh")));
    assert!(h.mock.ran(&format!("rm -rf {staging} {staging}.sh")));

    assert_eq!(h.store.get_backup(record.id).await.unwrap(), record);
}

#[tokio::test]
async fn test_restore_rejects_failed_backup() {
    let h = harness().await;
    let config = configure(&h).await;
    let mut record = BackupRecord::start(h.workload.id, config.id, Utc::now());
    record.status = BackupStatus::Failed;
    h.store.save_backup(&record).await.unwrap();

    let err = h.backups.restore(record.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::IncompleteArtifact(_)));
    assert_eq!(h.mock.connect_count(), 0);
}

#[tokio::test]
async fn test_restore_script_failure_is_reported() {
    let h = harness().await;
    configure(&h).await;
    stage_artifacts(&h.mock);
    let record = h.backups.run_backup(h.workload.id).await.unwrap().data.unwrap();
    h.mock.respond("sh /tmp/restore/", ExecOutput::failed(1, "tar: short read"));

    let outcome = h.backups.restore(record.id).await.unwrap();
    assert!(!outcome.success);
    assert!(h.mock.ran("rm -rf /tmp/restore/"));
    assert_eq!(h.store.get_backup(record.id).await.unwrap().status, BackupStatus::Completed);
}

#[tokio::test]
async fn test_prune_applies_retention_policy() {
    let h = harness().await;
    let config = configure(&h).await;
    let now = Utc::now();
    let slug = h.workload.id.slug();

    let aged = |status: BackupStatus, days: i64| {
        let mut r = BackupRecord::start(h.workload.id, config.id, now - Duration::days(days));
        r.status = status;
        r
    };
    let mut old_completed = aged(BackupStatus::Completed, 40);
    let old_prefix = format!("services/{slug}/old");
    old_completed.location = Some(h.storage.location(&old_prefix));
    let scratch = tempfile::tempdir().unwrap();
    let artifact = scratch.path().join("data.tar.gz");
    tokio::fs::write(&artifact, b"x").await.unwrap();
    h.storage
        .put_file(&format!("{old_prefix}/data.tar.gz"), &artifact)
        .await
        .unwrap();

    let keep = [
        aged(BackupStatus::Completed, 5),
        aged(BackupStatus::Failed, 3),
        aged(BackupStatus::Running, 100),
    ];
    let old_failed = aged(BackupStatus::Failed, 8);
    for r in keep.iter().chain([&old_completed, &old_failed]) {
        h.store.save_backup(r).await.unwrap();
    }

    let report = h.backups.prune(h.workload.id).await.unwrap();
    assert_eq!(report.removed.len(), 2);
    assert!(report.removed.contains(&old_completed.id));
    assert!(report.removed.contains(&old_failed.id));
    assert_eq!(report.objects_deleted, 1);
    assert!(h.storage.list(&old_prefix).await.unwrap().is_empty());

    let remaining = h.store.list_backups_for_workload(h.workload.id).await.unwrap();
    assert_eq!(remaining.len(), 3);
    assert!(keep.iter().all(|k| remaining.iter().any(|r| r.id == k.id)));
}

#[tokio::test]
async fn test_scheduler_runs_due_backups() {
    let h = harness().await;
    configure(&h).await;
    stage_artifacts(&h.mock);

    let scheduler = BackupScheduler::new(h.store.clone(), h.backups.clone(), std::time::Duration::from_secs(3600));

    let off_hour = Utc.with_ymd_and_hms(2026, 10, 17, 14, 0, 0).unwrap();
    let stats = scheduler.tick(off_hour).await.unwrap();
    assert_eq!(stats.started, 0);

    let due = Utc.with_ymd_and_hms(2026, 10, 17, 3, 0, 0).unwrap();
    let stats = scheduler.tick(due).await.unwrap();
    assert_eq!((stats.started, stats.failed), (1, 0));

    let records = h.store.list_backups_for_workload(h.workload.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, BackupStatus::Completed);
}
