//! Backup records and per-workload backup configuration.

use appz_id::{BackupConfigId, BackupId, WorkloadId};
use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKUP_TIME: &str = "03:00";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_BACKUP_PREFIX: &str = "services";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Running,
    Completed,
    Failed,
}

/// Files stored for one completed backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub files: Vec<String>,
    pub timestamp: String,
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub workload_id: WorkloadId,
    pub config_id: BackupConfigId,
    pub timestamp: DateTime<Utc>,
    pub status: BackupStatus,
    /// `s3://{bucket}/{prefix}/` once completed.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub size_mb: u64,
    #[serde(default)]
    pub file_count: usize,
    #[serde(default)]
    pub manifest: Option<BackupManifest>,
    #[serde(default)]
    pub can_restore: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub last_restore_at: Option<DateTime<Utc>>,
}

impl BackupRecord {
    /// A fresh `Running` record.
    pub fn start(workload_id: WorkloadId, config_id: BackupConfigId, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: BackupId::new(),
            workload_id,
            config_id,
            timestamp,
            status: BackupStatus::Running,
            location: None,
            size_mb: 0,
            file_count: 0,
            manifest: None,
            can_restore: false,
            error: None,
            last_restore_at: None,
        }
    }

    /// Object key prefix of `location` within `bucket`.
    pub fn storage_prefix(&self, bucket: &str) -> Option<String> {
        let location = self.location.as_deref()?;
        let prefix = location.strip_prefix(&format!("s3://{bucket}/"))?;
        Some(prefix.trim_end_matches('/').to_string())
    }

    pub fn is_restorable(&self) -> bool {
        self.status == BackupStatus::Completed && self.can_restore
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupFrequency {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastBackupStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub id: BackupConfigId,
    pub workload_id: WorkloadId,
    pub enabled: bool,
    pub frequency: BackupFrequency,
    /// `HH:MM`, UTC.
    pub backup_time: String,
    pub retention_days: u32,
    pub bucket: String,
    pub prefix: String,
    #[serde(default)]
    pub last_backup_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_backup_status: Option<LastBackupStatus>,
    #[serde(default)]
    pub last_backup_size_mb: u64,
    #[serde(default)]
    pub total_backup_count: u64,
}

impl BackupConfig {
    /// Daily at 03:00, kept for 30 days.
    pub fn default_for(workload_id: WorkloadId, bucket: impl Into<String>) -> Self {
        Self {
            id: BackupConfigId::new(),
            workload_id,
            enabled: true,
            frequency: BackupFrequency::Daily,
            backup_time: DEFAULT_BACKUP_TIME.to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
            bucket: bucket.into(),
            prefix: DEFAULT_BACKUP_PREFIX.to_string(),
            last_backup_at: None,
            last_backup_status: None,
            last_backup_size_mb: 0,
            total_backup_count: 0,
        }
    }

    /// Check user-supplied fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.parsed_time().is_none() {
            return Err(format!("backup_time must be HH:MM, got {:?}", self.backup_time));
        }
        if self.retention_days == 0 {
            return Err("retention_days must be at least 1".to_string());
        }
        if self.bucket.trim().is_empty() {
            return Err("bucket must not be empty".to_string());
        }
        if self.prefix.trim_matches('/').trim().is_empty() {
            return Err("prefix must not be empty".to_string());
        }
        Ok(())
    }

    fn parsed_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.backup_time, "%H:%M").ok()
    }

    /// Whether an hourly tick at `now` should run this backup.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(time) = self.parsed_time() else {
            return false;
        };
        if time.hour() != now.hour() {
            return false;
        }
        match self.frequency {
            BackupFrequency::Daily => true,
            BackupFrequency::Weekly => now.weekday() == Weekday::Sun,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[test]
    fn test_default_config() {
        let config = BackupConfig::default_for(WorkloadId::new(), "appz-backups");
        assert_eq!(config.backup_time, "03:00");
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.frequency, BackupFrequency::Daily);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    // 2026-10-18 is a Sunday
    #[case(BackupFrequency::Daily, 2026, 10, 17, 3, true)]
    #[case(BackupFrequency::Daily, 2026, 10, 17, 4, false)]
    #[case(BackupFrequency::Weekly, 2026, 10, 17, 3, false)]
    #[case(BackupFrequency::Weekly, 2026, 10, 18, 3, true)]
    fn test_is_due(
        #[case] frequency: BackupFrequency,
        #[case] year: i32,
        #[case] month: u32,
        #[case] day: u32,
        #[case] hour: u32,
        #[case] expected: bool,
    ) {
        let mut config = BackupConfig::default_for(WorkloadId::new(), "b");
        config.frequency = frequency;
        let now = Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap();
        assert_eq!(config.is_due(now), expected);
    }

    #[test]
    fn test_disabled_never_due() {
        let mut config = BackupConfig::default_for(WorkloadId::new(), "b");
        config.enabled = false;
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 3, 0, 0).unwrap();
        assert!(!config.is_due(now));
    }

    #[test]
    fn test_invalid_time_rejected() {
        let mut config = BackupConfig::default_for(WorkloadId::new(), "b");
        config.backup_time = "3am".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_prefix() {
        let mut record = BackupRecord::start(WorkloadId::new(), BackupConfigId::new(), Utc::now());
        assert_eq!(record.storage_prefix("appz-backups"), None);
        record.location = Some("s3://appz-backups/services/svc-1/20261018-030000/".to_string());
        assert_eq!(
            record.storage_prefix("appz-backups").as_deref(),
            Some("services/svc-1/20261018-030000")
        );
        assert_eq!(record.storage_prefix("other"), None);
    }
}
