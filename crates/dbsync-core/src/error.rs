//! Error types for dbsync operations.

use crate::selection::Component;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of stderr bytes kept on an [`SyncError::Execution`].
const STDERR_EXCERPT_LIMIT: usize = 2048;

/// Classification used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Transport-level failure (DNS, refused connection, dropped link).
    Network,
    /// Credentials were rejected by the remote side.
    Auth,
    /// Anything deterministic: engine errors, validation, local state.
    Deterministic,
}

/// Why an SSH connection could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionFailure {
    Network,
    Auth,
}

/// Failures while interpreting the server's version report.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionError {
    #[error("unparseable server version: '{raw}'")]
    Unparseable { raw: String },
}

/// Failures while moving an artifact between hosts.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferError {
    #[error("network failure while transferring '{path}': {message}")]
    Network { path: String, message: String },

    #[error("size mismatch for '{path}': remote reports {expected} bytes, local copy has {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("insufficient space at {location}: {required} bytes required, {available} available")]
    InsufficientSpace {
        location: String,
        required: u64,
        available: u64,
    },

    #[error("artifact '{path}' is not readable: {message}")]
    Corrupt { path: String, message: String },

    #[error("local file error on '{path}': {message}")]
    Local { path: String, message: String },
}

/// A shared error type for every dbsync operation.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncError {
    /// SSH session could not be established or was lost
    #[error("Failed to connect to {host}: {message}")]
    Connection {
        host: String,
        kind: ConnectionFailure,
        message: String,
    },

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    /// A command ran and exited non-zero
    #[error("Command `{command}` failed{}: {stderr}", exit_suffix(.exit_code))]
    Execution {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Restore asked for components the artifact does not hold
    #[error("Backup is missing requested components: {}", join_components(.missing))]
    PartialSource { missing: Vec<Component> },

    /// Remote deletion failed after a successful transfer
    #[error("Failed to remove remote artifact '{path}': {message}")]
    Cleanup { path: String, message: String },

    #[error("{component} is not supported by {engine}")]
    Unsupported { component: Component, engine: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Artifact lifecycle transition that is not allowed
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => " without an exit code".to_string(),
    }
}

fn join_components(components: &[Component]) -> String {
    components
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl SyncError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    pub fn network(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            kind: ConnectionFailure::Network,
            message: message.into(),
        }
    }

    pub fn auth(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            kind: ConnectionFailure::Auth,
            message: message.into(),
        }
    }

    /// Creates an Execution error, keeping only the tail of stderr.
    pub fn execution(
        command: impl Into<String>,
        exit_code: Option<i32>,
        stderr: impl AsRef<str>,
    ) -> Self {
        Self::Execution {
            command: command.into(),
            exit_code,
            stderr: stderr_excerpt(stderr.as_ref()),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// How the retry policy should treat this error.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Connection {
                kind: ConnectionFailure::Network,
                ..
            } => FailureClass::Network,
            Self::Connection {
                kind: ConnectionFailure::Auth,
                ..
            } => FailureClass::Auth,
            Self::Transfer(TransferError::Network { .. }) => FailureClass::Network,
            _ => FailureClass::Deterministic,
        }
    }

    /// True when the session that produced this error should be discarded.
    pub fn is_transport_failure(&self) -> bool {
        self.failure_class() != FailureClass::Deterministic
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_partial_source(&self) -> bool {
        matches!(self, Self::PartialSource { .. })
    }

    pub fn is_cleanup(&self) -> bool {
        matches!(self, Self::Cleanup { .. })
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_EXCERPT_LIMIT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_EXCERPT_LIMIT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, SyncError>`.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_class() {
        assert_eq!(
            SyncError::network("db1", "refused").failure_class(),
            FailureClass::Network
        );
        assert_eq!(
            SyncError::auth("db1", "denied").failure_class(),
            FailureClass::Auth
        );
        let transfer = SyncError::Transfer(TransferError::Network {
            path: "/b/x.sql.gz".into(),
            message: "lost connection".into(),
        });
        assert_eq!(transfer.failure_class(), FailureClass::Network);
        assert_eq!(
            SyncError::execution("mysqldump", Some(2), "Access denied").failure_class(),
            FailureClass::Deterministic
        );
        assert!(!SyncError::config("missing").is_transport_failure());
    }

    #[test]
    fn test_connection_message_is_verbatim() {
        let err = SyncError::network("db1.example.com", "Connection timed out");
        assert_eq!(
            err.to_string(),
            "Failed to connect to db1.example.com: Connection timed out"
        );
    }

    #[test]
    fn test_execution_keeps_stderr_tail() {
        let long = format!("{}END", "x".repeat(5000));
        let err = SyncError::execution("mysqldump db", Some(2), &long);
        match err {
            SyncError::Execution {
                stderr, exit_code, ..
            } => {
                assert_eq!(exit_code, Some(2));
                assert!(stderr.ends_with("END"));
                assert!(stderr.len() <= STDERR_EXCERPT_LIMIT + 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_partial_source_lists_components() {
        let err = SyncError::PartialSource {
            missing: vec![Component::Triggers, Component::Events],
        };
        assert_eq!(
            err.to_string(),
            "Backup is missing requested components: triggers, events"
        );
        assert!(err.is_partial_source());
    }

    #[test]
    fn test_from_io_error() {
        let err: SyncError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, SyncError::Io { .. }));
    }
}
