//! Remote execution errors.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by remote sessions.
///
/// A command that runs and exits non-zero is not an error at this layer.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The host could not be reached or refused authentication.
    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    /// The command did not complete within its bound. The remote process
    /// may still be running.
    #[error("command timed out after {}s: {command}", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// A file transfer failed after the session was established.
    #[error("transfer of {path} failed: {message}")]
    Transfer { path: String, message: String },

    /// Local I/O failure (spawning ssh, reading staging files).
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection_error",
            Self::Timeout { .. } => "timeout",
            Self::Transfer { .. } => "transfer_failed",
            Self::Io(_) => "io_error",
        }
    }

    /// Returns true for connection failures.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
