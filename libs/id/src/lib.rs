//! # appz-id
//!
//! Typed identifiers for every record the control plane reads or writes:
//! hosts, workloads, templates, backup records and backup configurations.
//!
//! All identifiers use the form `{prefix}_{ulid}`:
//!
//! - `host_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `svc_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `bkp_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! ULIDs are time-ordered, so sorting ids of one kind yields creation order.
//! Placement relies on this to enumerate hosts in a stable order.
//!
//! Workload ids also name remote directories, compose projects and
//! containers. Those places want lowercase DNS-safe labels, so every id
//! offers [`slug`](WorkloadId::slug): `svc-01hv4z3mxnkpqr9hstz7wcld4e`.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
