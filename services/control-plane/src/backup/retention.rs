//! Which backup records have outlived their retention window.

use chrono::{DateTime, Duration, Utc};

use crate::model::{BackupRecord, BackupStatus};

/// Failed records are kept this long regardless of configuration.
pub const FAILED_RETENTION_DAYS: i64 = 7;

/// Completed records older than `retention_days` and failed records older
/// than [`FAILED_RETENTION_DAYS`]. Running records are never expired.
pub fn select_expired(records: &[BackupRecord], retention_days: u32, now: DateTime<Utc>) -> Vec<&BackupRecord> {
    let completed_cutoff = now - Duration::days(i64::from(retention_days));
    let failed_cutoff = now - Duration::days(FAILED_RETENTION_DAYS);

    records
        .iter()
        .filter(|r| match r.status {
            BackupStatus::Completed => r.timestamp < completed_cutoff,
            BackupStatus::Failed => r.timestamp < failed_cutoff,
            BackupStatus::Running => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use appz_id::{BackupConfigId, WorkloadId};
    use proptest::prelude::*;
    use rstest::rstest;

    fn record(status: BackupStatus, age_days: i64, now: DateTime<Utc>) -> BackupRecord {
        let mut r = BackupRecord::start(WorkloadId::new(), BackupConfigId::new(), now - Duration::days(age_days));
        r.status = status;
        r
    }

    #[rstest]
    #[case(BackupStatus::Completed, 31, true)]
    #[case(BackupStatus::Completed, 29, false)]
    #[case(BackupStatus::Failed, 8, true)]
    #[case(BackupStatus::Failed, 6, false)]
    #[case(BackupStatus::Running, 400, false)]
    fn test_policy(#[case] status: BackupStatus, #[case] age_days: i64, #[case] expired: bool) {
        let now = Utc::now();
        let records = vec![record(status, age_days, now)];
        assert_eq!(select_expired(&records, 30, now).len(), usize::from(expired));
    }

    #[test]
    fn test_failed_window_ignores_retention_setting() {
        let now = Utc::now();
        let records = vec![record(BackupStatus::Failed, 10, now)];
        assert_eq!(select_expired(&records, 365, now).len(), 1);
    }

    fn status() -> impl Strategy<Value = BackupStatus> {
        prop_oneof![
            Just(BackupStatus::Running),
            Just(BackupStatus::Completed),
            Just(BackupStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn prop_removes_exactly_the_expired(
            entries in prop::collection::vec((status(), 0i64..100 * 24), 0..30),
            retention_days in 1u32..60,
        ) {
            let now = Utc::now();
            let records: Vec<BackupRecord> = entries
                .iter()
                .map(|(status, age_hours)| {
                    let mut r = record(*status, 0, now);
                    r.timestamp = now - Duration::hours(*age_hours);
                    r
                })
                .collect();

            let expired: Vec<_> = select_expired(&records, retention_days, now).iter().map(|r| r.id).collect();

            for r in &records {
                let age = now - r.timestamp;
                let should = match r.status {
                    BackupStatus::Completed => age > Duration::days(i64::from(retention_days)),
                    BackupStatus::Failed => age > Duration::days(FAILED_RETENTION_DAYS),
                    BackupStatus::Running => false,
                };
                prop_assert_eq!(expired.contains(&r.id), should);
            }
        }
    }
}
