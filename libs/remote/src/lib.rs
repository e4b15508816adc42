//! Remote execution client for appz hosts.
//!
//! A [`Connector`] opens one authenticated [`RemoteSession`] per host. The
//! session runs shell commands with an explicit timeout and moves bytes
//! between the control plane and the host.
//!
//! Failure modes are kept apart:
//! - the host cannot be reached or authenticated: [`RemoteError::Connection`]
//! - the command did not finish in time: [`RemoteError::Timeout`]
//! - the command ran and exited non-zero: returned in [`ExecOutput`], not raised
//!
//! [`RemoteClient`] is the scoped owner used by orchestrator operations. It
//! caches at most one session per host and releases every session when it is
//! closed or dropped.
//!
//! [`mock::MockConnector`] is an in-memory scripted host for tests.

pub mod client;
pub mod error;
pub mod mock;
pub mod quote;
pub mod session;
pub mod ssh;

pub use client::RemoteClient;
pub use error::RemoteError;
pub use quote::shell_quote;
pub use session::{
    Connector, ExecOutput, HostTarget, RemoteSession, BACKUP_TIMEOUT, DEFAULT_TIMEOUT,
    INSTALL_TIMEOUT, TRANSFER_TIMEOUT,
};
pub use ssh::SshConnector;
