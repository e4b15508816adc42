//! Periodic background workers.

mod backup;
mod monitor;

pub use backup::{BackupScheduler, TickStats};
pub use monitor::MonitorWorker;
