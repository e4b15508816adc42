//! Backup and restore of workload data through object storage.
//!
//! A backup runs a shell script on the host that leaves its artifacts in a
//! staging directory. Each artifact is relayed through a local temp file
//! into the bucket under `{prefix}/{workload}/{timestamp}-{backup}/`. Restore walks
//! the same path in reverse.

mod orchestrator;
pub mod retention;
pub mod scripts;

pub use orchestrator::{BackupOrchestrator, PruneReport};
pub use retention::{select_expired, FAILED_RETENTION_DAYS};
