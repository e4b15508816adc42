//! OpenSSH-backed sessions.
//!
//! `connect` starts a control master (`ssh -M -N -S <socket>`) and every
//! later command multiplexes over its socket, so a host is authenticated once
//! per session. The master is spawned with `kill_on_drop` and its socket lives
//! in a temporary directory: dropping the session tears both down even when
//! `close()` is never reached.
//!
//! File transfer streams through `cat` on the remote side, which keeps the
//! host requirements down to a POSIX shell.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RemoteError;
use crate::quote::shell_quote;
use crate::session::{Connector, ExecOutput, HostTarget, RemoteSession, TRANSFER_TIMEOUT};

/// Exit status ssh itself uses for connection-level failures.
const SSH_ERROR_EXIT: i32 = 255;

/// Poll interval while waiting for the control master.
const MASTER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period for the master to exit after `-O exit`.
const MASTER_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Connector that drives the system `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshConnector {
    ssh_path: PathBuf,
    connect_timeout: Duration,
}

impl SshConnector {
    /// Create a connector with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            ssh_path: PathBuf::from("ssh"),
            connect_timeout,
        }
    }

    /// Use a specific ssh binary.
    pub fn with_ssh_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_path = path.into();
        self
    }

    fn master_args(&self, target: &HostTarget, socket: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-M".into(),
            "-N".into(),
            "-S".into(),
            socket.into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)).into(),
            "-o".into(),
            "ServerAliveInterval=15".into(),
            "-p".into(),
            target.port.to_string().into(),
        ];
        if let Some(identity) = &target.identity_file {
            args.push("-i".into());
            args.push(identity.into());
        }
        args.push(target.destination().into());
        args
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &HostTarget) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        let socket_dir = tempfile::Builder::new().prefix("appz-ssh-").tempdir()?;
        let socket = socket_dir.path().join("control");

        debug!(
            host_id = %target.host_id,
            address = %target.address,
            "Starting ssh control master"
        );

        let master = Command::new(&self.ssh_path)
            .args(self.master_args(target, &socket))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let session = SshSession {
            target: target.clone(),
            ssh_path: self.ssh_path.clone(),
            socket,
            master: Mutex::new(Some(master)),
            _socket_dir: socket_dir,
        };

        // ssh gives up after ConnectTimeout; allow a little slack for auth.
        session
            .wait_ready(self.connect_timeout + Duration::from_secs(5))
            .await?;

        info!(
            host_id = %target.host_id,
            address = %target.address,
            "ssh session established"
        );

        Ok(Arc::new(session))
    }
}

/// A session multiplexed over an ssh control socket.
pub struct SshSession {
    target: HostTarget,
    ssh_path: PathBuf,
    socket: PathBuf,
    master: Mutex<Option<Child>>,
    _socket_dir: TempDir,
}

impl SshSession {
    fn connection_error(&self, message: impl Into<String>) -> RemoteError {
        RemoteError::Connection {
            host: self.target.address.clone(),
            message: message.into(),
        }
    }

    fn transfer_error(path: &str, message: impl Into<String>) -> RemoteError {
        RemoteError::Transfer {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// A command that reuses the control socket.
    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_path);
        cmd.arg("-S")
            .arg(&self.socket)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-p")
            .arg(self.target.port.to_string())
            .arg(self.target.destination())
            .arg(remote_command)
            .kill_on_drop(true);
        cmd
    }

    async fn control(&self, operation: &str) -> std::io::Result<ExitStatus> {
        Command::new(&self.ssh_path)
            .arg("-S")
            .arg(&self.socket)
            .arg("-O")
            .arg(operation)
            .arg(self.target.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
    }

    async fn master_alive(&self) -> bool {
        self.control("check")
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn wait_ready(&self, deadline: Duration) -> Result<(), RemoteError> {
        let started = tokio::time::Instant::now();
        loop {
            {
                let mut guard = self.master.lock().await;
                let Some(child) = guard.as_mut() else {
                    return Err(self.connection_error("session already closed"));
                };
                if let Some(status) = child.try_wait()? {
                    let mut stderr = String::new();
                    if let Some(mut pipe) = child.stderr.take() {
                        if let Err(e) = pipe.read_to_string(&mut stderr).await {
                            debug!(error = %e, "Failed to read ssh stderr");
                        }
                    }
                    guard.take();
                    return Err(self.connection_error(format!(
                        "ssh exited with {status}: {}",
                        stderr.trim()
                    )));
                }
            }

            if self.master_alive().await {
                return Ok(());
            }

            if started.elapsed() >= deadline {
                return Err(self.connection_error(format!(
                    "no connection after {}s",
                    deadline.as_secs()
                )));
            }

            tokio::time::sleep(MASTER_POLL_INTERVAL).await;
        }
    }

    async fn pipe_in<R>(&self, reader: &mut R, remote_path: &str) -> Result<(), RemoteError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let command = match remote_parent(remote_path) {
            Some(parent) => format!(
                "mkdir -p {} && cat > {}",
                shell_quote(parent),
                shell_quote(remote_path)
            ),
            None => format!("cat > {}", shell_quote(remote_path)),
        };

        let mut child = self
            .command(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Self::transfer_error(remote_path, "stdin not captured"))?;

        let transfer = async move {
            let copied = tokio::io::copy(reader, &mut stdin).await?;
            stdin.shutdown().await?;
            drop(stdin);
            let output = child.wait_with_output().await?;
            Ok::<_, std::io::Error>((copied, output))
        };

        let (copied, output) = tokio::time::timeout(TRANSFER_TIMEOUT, transfer)
            .await
            .map_err(|_| RemoteError::Timeout {
                command: command.clone(),
                timeout: TRANSFER_TIMEOUT,
            })?
            .map_err(|e| Self::transfer_error(remote_path, e.to_string()))?;

        if !output.status.success() {
            return Err(Self::transfer_error(
                remote_path,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        debug!(
            host_id = %self.target.host_id,
            remote_path,
            bytes = copied,
            "Uploaded"
        );
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn target(&self) -> &HostTarget {
        &self.target
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, RemoteError> {
        debug!(host_id = %self.target.host_id, command, "Executing remote command");

        let child = self
            .command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Dropping the future on timeout kills the local ssh client only.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    host_id = %self.target.host_id,
                    command,
                    timeout_secs = timeout.as_secs(),
                    "Remote command timed out"
                );
                return Err(RemoteError::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if exit_code == SSH_ERROR_EXIT && !self.master_alive().await {
            return Err(self.connection_error(stderr.trim().to_string()));
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            exit_code,
        })
    }

    async fn upload_content(&self, content: &[u8], remote_path: &str) -> Result<(), RemoteError> {
        let mut reader = content;
        self.pipe_in(&mut reader, remote_path).await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        let mut file = tokio::fs::File::open(local_path).await?;
        self.pipe_in(&mut file, remote_path).await
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<(), RemoteError> {
        let command = format!("cat {}", shell_quote(remote_path));
        let mut child = self
            .command(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Self::transfer_error(remote_path, "stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Self::transfer_error(remote_path, "stderr not captured"))?;
        let mut file = tokio::fs::File::create(local_path).await?;

        let transfer = async move {
            let mut message = String::new();
            let (copied, _) = tokio::try_join!(
                tokio::io::copy(&mut stdout, &mut file),
                stderr.read_to_string(&mut message)
            )?;
            file.flush().await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((copied, status, message))
        };

        let (copied, status, message) = tokio::time::timeout(TRANSFER_TIMEOUT, transfer)
            .await
            .map_err(|_| RemoteError::Timeout {
                command: command.clone(),
                timeout: TRANSFER_TIMEOUT,
            })?
            .map_err(|e| Self::transfer_error(remote_path, e.to_string()))?;

        if !status.success() {
            return Err(Self::transfer_error(remote_path, message.trim().to_string()));
        }

        debug!(
            host_id = %self.target.host_id,
            remote_path,
            bytes = copied,
            "Downloaded"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), RemoteError> {
        let Some(mut master) = self.master.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = self.control("exit").await {
            warn!(host_id = %self.target.host_id, error = %e, "ssh -O exit failed");
        }

        if tokio::time::timeout(MASTER_EXIT_GRACE, master.wait())
            .await
            .is_err()
        {
            master.kill().await?;
        }

        info!(host_id = %self.target.host_id, "ssh session closed");
        Ok(())
    }
}

/// Parent directory of a remote path, if it has a non-root one.
fn remote_parent(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => Some(parent),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appz_id::HostId;

    #[test]
    fn test_remote_parent() {
        assert_eq!(remote_parent("/apps/svc-1/docker-compose.yml"), Some("/apps/svc-1"));
        assert_eq!(remote_parent("/compose.yml"), None);
        assert_eq!(remote_parent("compose.yml"), None);
    }

    #[test]
    fn test_master_args_include_identity_and_port() {
        let connector = SshConnector::new(Duration::from_secs(10));
        let target = HostTarget::new(HostId::new(), "198.51.100.7", "deploy")
            .with_port(2200)
            .with_identity_file("/keys/id_ed25519");
        let args: Vec<String> = connector
            .master_args(&target, Path::new("/tmp/ctl"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(&args[..4], &["-M", "-N", "-S", "/tmp/ctl"]);
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2200"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/keys/id_ed25519"));
        assert_eq!(args.last().map(String::as_str), Some("deploy@198.51.100.7"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        // `false` exits immediately with status 1, like ssh failing auth.
        let connector = SshConnector::new(Duration::from_secs(1)).with_ssh_path("false");
        let target = HostTarget::new(HostId::new(), "192.0.2.1", "root");

        let err = match connector.connect(&target).await {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        assert!(err.is_connection(), "unexpected error: {err}");
    }
}
