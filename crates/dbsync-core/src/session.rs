//! Traits for the remote shell and the local database client.

use crate::command::RemoteCommand;
use crate::error::{Result, SyncError};
use crate::plan::restore::ImportStep;
use crate::profile::{DatabaseEndpoint, SshEndpoint};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turns a non-zero exit into an `Execution` error.
    ///
    /// `command` must already be redacted.
    pub fn into_result(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SyncError::execution(
                command,
                Some(self.exit_code),
                &self.stderr,
            ))
        }
    }
}

/// Per-call execution controls.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
    /// Try to stop the remote process group when the call is abandoned.
    pub terminate_remote: bool,
}

impl ExecOptions {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_terminate_remote(mut self, terminate: bool) -> Self {
        self.terminate_remote = terminate;
        self
    }
}

/// Time limits for the different kinds of commands. `None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTimeouts {
    /// Detection queries and small remote commands.
    pub query: Option<Duration>,
    pub dump: Option<Duration>,
    pub transfer: Option<Duration>,
    pub import: Option<Duration>,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            query: Some(Duration::from_secs(60)),
            dump: None,
            transfer: None,
            import: None,
        }
    }
}

/// An authenticated shell on the source host.
///
/// Implementations map transport failures to `SyncError::Connection` and
/// return remote exit codes in [`CommandOutput`] instead of failing.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn host(&self) -> &str;

    async fn execute(&self, command: &RemoteCommand, options: &ExecOptions)
    -> Result<CommandOutput>;

    /// Copies a remote file to `local`.
    async fn download(&self, remote: &str, local: &Path, options: &ExecOptions) -> Result<()>;

    /// Copies `local` to a remote path.
    async fn upload(&self, local: &Path, remote: &str, options: &ExecOptions) -> Result<()>;

    /// Releases the connection. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Opens sessions. Each call yields a fresh connection.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(&self, endpoint: &SshEndpoint) -> Result<Arc<dyn RemoteSession>>;
}

/// The database client on this machine, pointed at the destination.
#[async_trait]
pub trait SqlClient: Send + Sync {
    /// Runs one statement in batch mode without column headers.
    async fn query(
        &self,
        endpoint: &DatabaseEndpoint,
        sql: &str,
        options: &ExecOptions,
    ) -> Result<CommandOutput>;

    /// Feeds a staged section through the client.
    ///
    /// When the step carries an integrity toggle, the relax statements go
    /// first and the restore statements are written after the body even if
    /// copying the body fails.
    async fn import(&self, step: &ImportStep, options: &ExecOptions) -> Result<CommandOutput>;
}
