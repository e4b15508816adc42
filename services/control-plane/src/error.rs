//! Orchestrator error taxonomy and the uniform operation result.

use appz_remote::{ExecOutput, RemoteError};
use serde::Serialize;
use thiserror::Error;

use crate::providers::ProviderError;
use crate::secrets::SecretsCryptoError;
use crate::storage::StorageError;
use crate::store::StoreError;

/// Errors surfaced by the capacity, deployment and backup orchestrators.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The host could not be reached or authenticated.
    #[error("cannot reach host: {0}")]
    Connection(String),

    /// A remote command ran and exited non-zero.
    #[error("`{command}` exited with {exit_code}: {stderr}")]
    CommandFailure {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A remote command did not finish in time. Remote state is unknown.
    #[error("timed out after {timeout_secs}s: {command}")]
    Timeout { command: String, timeout_secs: u64 },

    /// Placement found no eligible host.
    #[error("no host has capacity for {0}")]
    NoCapacity(String),

    /// Missing backup configuration, template or topology.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Restore attempted on a record that is not a complete artifact set.
    #[error("backup {0} is not restorable")]
    IncompleteArtifact(String),

    #[error("{0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("template rendering failed: {0}")]
    TemplateRender(String),

    #[error("topology error: {0}")]
    Topology(String),

    #[error("credentials error: {0}")]
    Secrets(#[from] SecretsCryptoError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("record store error: {0}")]
    Store(StoreError),
}

impl OrchestratorError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::CommandFailure { .. } => "command_failure",
            Self::Timeout { .. } => "timeout",
            Self::NoCapacity(_) => "no_capacity",
            Self::ConfigurationMissing(_) => "configuration_missing",
            Self::Storage(_) => "storage_error",
            Self::IncompleteArtifact(_) => "incomplete_artifact",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::InvalidInput(_) => "invalid_input",
            Self::TemplateRender(_) => "template_render_failed",
            Self::Topology(_) => "topology_error",
            Self::Secrets(_) => "secrets_error",
            Self::Provider(_) => "provider_error",
            Self::Store(_) => "store_error",
        }
    }

    /// Failure of `command` as reported in `output`.
    pub fn command_failure(command: impl Into<String>, output: &ExecOutput) -> Self {
        Self::CommandFailure {
            command: command.into(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        }
    }
}

impl From<RemoteError> for OrchestratorError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Connection { host, message } => {
                Self::Connection(format!("{host}: {message}"))
            }
            RemoteError::Timeout { command, timeout } => Self::Timeout {
                command,
                timeout_secs: timeout.as_secs(),
            },
            RemoteError::Transfer { path, message } => Self::CommandFailure {
                command: format!("transfer {path}"),
                exit_code: 1,
                stderr: message,
            },
            RemoteError::Io(e) => Self::Connection(format!("local ssh client: {e}")),
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            other => Self::Store(other),
        }
    }
}

/// Uniform `{success, error?}` result of a mutating operation.
///
/// Failures that happen after the record has transitioned (deployment,
/// backup) come back as `success: false` with the captured message; the
/// record holds the same message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> OperationOutcome<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            error: None,
            code: None,
            data: Some(data),
        }
    }

    pub fn failed(err: &OrchestratorError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
            data: None,
        }
    }

    /// Carry `data` along with a failure.
    pub fn failed_with(err: &OrchestratorError, data: T) -> Self {
        Self {
            data: Some(data),
            ..Self::failed(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_remote_errors_keep_their_kind() {
        let err: OrchestratorError = RemoteError::Timeout {
            command: "docker compose up -d".to_string(),
            timeout: Duration::from_secs(300),
        }
        .into();
        assert_eq!(err.code(), "timeout");

        let err: OrchestratorError = RemoteError::Connection {
            host: "10.0.0.1".to_string(),
            message: "refused".to_string(),
        }
        .into();
        assert_eq!(err.code(), "connection_error");
    }

    #[test]
    fn test_outcome_serialization() {
        let ok = serde_json::to_value(OperationOutcome::ok(3)).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "data": 3}));

        let err = OrchestratorError::NoCapacity("svc".to_string());
        let failed = serde_json::to_value(OperationOutcome::<()>::failed(&err)).unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["code"], "no_capacity");
        assert_eq!(failed["error"], "no host has capacity for svc");
    }

    #[test]
    fn test_not_found_maps_from_store() {
        let err: OrchestratorError = StoreError::not_found("workload", "svc_x").into();
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.to_string(), "workload svc_x not found");
    }
}
