//! Session and connector interfaces.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use appz_id::HostId;
use async_trait::async_trait;

use crate::error::RemoteError;

/// Bound for ordinary commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound for host setup and package installation.
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Bound for backup and restore scripts.
pub const BACKUP_TIMEOUT: Duration = Duration::from_secs(600);

/// Bound for a single file transfer.
pub const TRANSFER_TIMEOUT: Duration = BACKUP_TIMEOUT;

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    /// Host the session belongs to. Sessions are cached by this id.
    pub host_id: HostId,

    /// IP address or DNS name.
    pub address: String,

    /// SSH port.
    pub port: u16,

    /// Remote login user.
    pub user: String,

    /// Private key. `None` lets ssh pick its defaults.
    pub identity_file: Option<PathBuf>,
}

impl HostTarget {
    /// Creates a target on port 22.
    pub fn new(host_id: HostId, address: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host_id,
            address: address.into(),
            port: 22,
            user: user.into(),
            identity_file: None,
        }
    }

    /// Set a private key file.
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Set a non-default port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `user@address` destination string.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// True when the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An authenticated shell session on one host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// The target this session is connected to.
    fn target(&self) -> &HostTarget;

    /// Run `command` through the remote shell and wait for it.
    ///
    /// A non-zero exit is reported in the output. Exceeding `timeout` fails
    /// with [`RemoteError::Timeout`]; the remote process is not cancelled.
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, RemoteError>;

    /// Write `content` to `remote_path`, creating parent directories.
    async fn upload_content(&self, content: &[u8], remote_path: &str) -> Result<(), RemoteError>;

    /// Copy a local file to `remote_path`, creating parent directories.
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError>;

    /// Copy `remote_path` into a local file.
    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<(), RemoteError>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), RemoteError>;
}

/// Opens sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish an authenticated session to `target`.
    async fn connect(&self, target: &HostTarget) -> Result<Arc<dyn RemoteSession>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_success() {
        assert!(ExecOutput::ok("done").success());
        assert!(!ExecOutput::failed(1, "boom").success());
    }

    #[test]
    fn test_host_target_destination() {
        let target = HostTarget::new(HostId::new(), "203.0.113.10", "root").with_port(2222);
        assert_eq!(target.destination(), "root@203.0.113.10");
        assert_eq!(target.port, 2222);
        assert!(target.identity_file.is_none());
    }

    #[test]
    fn test_timeouts_are_ordered() {
        assert!(DEFAULT_TIMEOUT < INSTALL_TIMEOUT);
        assert!(INSTALL_TIMEOUT < BACKUP_TIMEOUT);
    }
}
