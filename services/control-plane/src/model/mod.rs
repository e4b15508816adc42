//! Plain records exchanged with the record store.
//!
//! The orchestrators read and write these by id and never embed persistence
//! logic; see [`crate::store::RecordStore`].

mod backup;
mod footprint;
mod host;
mod template;
mod workload;

pub use backup::{
    BackupConfig, BackupFrequency, BackupManifest, BackupRecord, BackupStatus, LastBackupStatus,
    DEFAULT_BACKUP_PREFIX, DEFAULT_BACKUP_TIME, DEFAULT_RETENTION_DAYS,
};
pub use footprint::Footprint;
pub use host::{
    Host, HostStatus, Resources, DEFAULT_MAX_CPU_PERCENT, DEFAULT_MAX_RAM_PERCENT,
};
pub use template::{Template, TemplateStatus};
pub use workload::{Observability, Workload, WorkloadStatus};
