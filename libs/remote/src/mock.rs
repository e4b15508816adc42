//! Scripted in-memory remote hosts for tests and development.
//!
//! Commands are recorded and answered from a rule table matched by substring.
//! Uploaded content is kept in a map keyed by remote path so tests can assert
//! on rendered files and seed files for downloads.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use appz_id::HostId;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::RemoteError;
use crate::session::{Connector, ExecOutput, HostTarget, RemoteSession};

/// One executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    pub host_id: HostId,
    pub command: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
enum Reply {
    Output(ExecOutput),
    Timeout,
    Disconnect,
}

#[derive(Debug, Default)]
struct MockState {
    rules: Vec<(String, Reply)>,
    files: HashMap<String, Vec<u8>>,
    records: Vec<ExecRecord>,
    unreachable: HashSet<String>,
    connects: usize,
    closes: usize,
}

impl MockState {
    fn reply_for(&self, command: &str) -> Reply {
        self.rules
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| Reply::Output(ExecOutput::default()))
    }

    /// Exact path first, then `*/name` entries matching by file name.
    fn lookup(&self, remote_path: &str) -> Option<Vec<u8>> {
        if let Some(content) = self.files.get(remote_path) {
            return Some(content.clone());
        }
        self.files
            .iter()
            .find(|(key, _)| {
                key.strip_prefix('*')
                    .is_some_and(|suffix| remote_path.ends_with(suffix))
            })
            .map(|(_, content)| content.clone())
    }
}

/// Connector handing out [`MockSession`]s that share one scripted state.
///
/// Unmatched commands succeed with empty output. When several rules match,
/// the most recently added one wins.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// Create a mock where every command succeeds silently.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer commands containing `pattern` with `output`.
    pub fn respond(&self, pattern: impl Into<String>, output: ExecOutput) -> &Self {
        self.state().rules.push((pattern.into(), Reply::Output(output)));
        self
    }

    /// Commands containing `pattern` time out.
    pub fn timeout_on(&self, pattern: impl Into<String>) -> &Self {
        self.state().rules.push((pattern.into(), Reply::Timeout));
        self
    }

    /// Commands containing `pattern` fail as a dropped connection.
    pub fn disconnect_on(&self, pattern: impl Into<String>) -> &Self {
        self.state().rules.push((pattern.into(), Reply::Disconnect));
        self
    }

    /// Connections to `address` fail.
    pub fn fail_connect(&self, address: impl Into<String>) -> &Self {
        self.state().unreachable.insert(address.into());
        self
    }

    /// Seed a remote file. A path of the form `*/name` matches any remote
    /// path ending in `/name`.
    pub fn put_file(&self, remote_path: impl Into<String>, content: impl Into<Vec<u8>>) -> &Self {
        self.state().files.insert(remote_path.into(), content.into());
        self
    }

    /// Content of a remote file.
    pub fn file(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.state().files.get(remote_path).cloned()
    }

    /// Content of a remote file as UTF-8.
    pub fn file_string(&self, remote_path: &str) -> Option<String> {
        self.file(remote_path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Every executed command, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state()
            .records
            .iter()
            .map(|r| r.command.clone())
            .collect()
    }

    /// Every executed command with host and timeout.
    pub fn records(&self) -> Vec<ExecRecord> {
        self.state().records.clone()
    }

    /// True if any executed command contains `pattern`.
    pub fn ran(&self, pattern: &str) -> bool {
        self.state()
            .records
            .iter()
            .any(|r| r.command.contains(pattern))
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    /// Number of sessions closed.
    pub fn closed_count(&self) -> usize {
        self.state().closes
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &HostTarget) -> Result<Arc<dyn RemoteSession>, RemoteError> {
        let mut state = self.state();
        if state.unreachable.contains(&target.address) {
            return Err(RemoteError::Connection {
                host: target.address.clone(),
                message: "[MOCK] host unreachable".to_string(),
            });
        }
        state.connects += 1;
        info!(host_id = %target.host_id, "[MOCK] Connected");

        Ok(Arc::new(MockSession {
            target: target.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// Session against the shared mock state.
#[derive(Debug)]
pub struct MockSession {
    target: HostTarget,
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    fn target(&self) -> &HostTarget {
        &self.target
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, RemoteError> {
        let reply = {
            let mut state = self.state();
            state.records.push(ExecRecord {
                host_id: self.target.host_id,
                command: command.to_string(),
                timeout,
            });
            state.reply_for(command)
        };
        debug!(host_id = %self.target.host_id, command, "[MOCK] exec");

        match reply {
            Reply::Output(output) => Ok(output),
            Reply::Timeout => Err(RemoteError::Timeout {
                command: command.to_string(),
                timeout,
            }),
            Reply::Disconnect => Err(RemoteError::Connection {
                host: self.target.address.clone(),
                message: "[MOCK] connection reset".to_string(),
            }),
        }
    }

    async fn upload_content(&self, content: &[u8], remote_path: &str) -> Result<(), RemoteError> {
        self.state()
            .files
            .insert(remote_path.to_string(), content.to_vec());
        Ok(())
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        let content = tokio::fs::read(local_path).await?;
        self.upload_content(&content, remote_path).await
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<(), RemoteError> {
        let content = self
            .state()
            .lookup(remote_path)
            .ok_or_else(|| RemoteError::Transfer {
                path: remote_path.to_string(),
                message: "[MOCK] no such file".to_string(),
            })?;
        tokio::fs::write(local_path, content).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.state().closes += 1;
        Ok(())
    }
}
