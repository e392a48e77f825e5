//! Moves artifacts between the source host and this machine.
//!
//! Every transfer is checked against the size the remote side reports.
//! A mismatch is fatal and never retried.

use crate::session_slot::SessionSlot;
use dbsync_core::artifact::{BackupArtifact, RemoteBackupEntry};
use dbsync_core::command::{RemoteCommand, shell_quote};
use dbsync_core::error::TransferError;
use dbsync_core::session::{ExecOptions, OperationTimeouts};
use dbsync_core::{Result, SyncError};
use dbsync_execution::RetryableOperation;
use dbsync_infrastructure::space::ensure_local_space;
use dbsync_infrastructure::staging::StagingArea;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Prints the byte size of a file, or `-1` when it does not exist.
pub fn size_script(path: &str) -> RemoteCommand {
    let path = shell_quote(path);
    RemoteCommand::new(format!(
        "if [ -f {path} ]; then wc -c < {path}; else echo -1; fi"
    ))
}

/// Prints `size<TAB>mtime<TAB>path` for each dump in `dir`.
pub fn listing_script(dir: &str) -> RemoteCommand {
    RemoteCommand::new(format!(
        "dir={}; [ -d \"$dir\" ] || exit 0; \
         for f in \"$dir\"/*.sql \"$dir\"/*.sql.gz; do \
         [ -f \"$f\" ] && stat --printf '%s\\t%Y\\t%n\\n' \"$f\"; \
         done; exit 0",
        shell_quote(dir.trim_end_matches('/'))
    ))
}

/// Prints the kilobytes available on the filesystem holding `dir`, creating
/// the directory first.
pub fn free_space_script(dir: &str) -> RemoteCommand {
    RemoteCommand::new(format!(
        "mkdir -p {dir} && df -Pk {dir} | tail -n 1",
        dir = shell_quote(dir)
    ))
}

/// Available bytes from the last line of `df -Pk`.
pub fn parse_df_available(output: &str) -> Option<u64> {
    let line = output.lines().rev().find(|l| !l.trim().is_empty())?;
    let kilobytes = line.split_whitespace().nth(3)?.parse::<u64>().ok()?;
    Some(kilobytes.saturating_mul(1024))
}

fn last_number(stdout: &str) -> Option<i64> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse().ok())
}

pub struct TransferManager<'a> {
    slot: &'a SessionSlot,
    timeouts: &'a OperationTimeouts,
    cancel: CancellationToken,
}

impl<'a> TransferManager<'a> {
    pub fn new(slot: &'a SessionSlot, timeouts: &'a OperationTimeouts) -> Self {
        Self {
            slot,
            timeouts,
            cancel: slot.cancel_token().clone(),
        }
    }

    fn query_options(&self) -> ExecOptions {
        ExecOptions::new(self.cancel.clone()).with_timeout(self.timeouts.query)
    }

    fn transfer_options(&self) -> ExecOptions {
        ExecOptions::new(self.cancel.clone()).with_timeout(self.timeouts.transfer)
    }

    async fn execute(&self, name: &str, command: &RemoteCommand) -> Result<String> {
        let options = self.query_options();
        let output = self
            .slot
            .run(&RetryableOperation::network(name), |session| {
                let options = &options;
                async move { session.execute(command, options).await }
            })
            .await?;
        Ok(output.into_result(&command.redacted())?.stdout)
    }

    /// Byte size of a remote file, `None` when it does not exist.
    pub async fn remote_size(&self, path: &str) -> Result<Option<u64>> {
        let stdout = self.execute("remote size", &size_script(path)).await?;
        match last_number(&stdout) {
            Some(size) if size >= 0 => Ok(Some(size as u64)),
            Some(_) => Ok(None),
            None => Err(SyncError::execution(
                format!("wc -c {path}"),
                Some(0),
                format!("unexpected output: {}", stdout.trim()),
            )),
        }
    }

    /// Dumps found in the remote backup directory, newest name first.
    pub async fn list(&self, dir: &str) -> Result<Vec<RemoteBackupEntry>> {
        let stdout = self.execute("list backups", &listing_script(dir)).await?;
        Ok(RemoteBackupEntry::parse_listing(&stdout))
    }

    /// Fails with `InsufficientSpace` when `dir` has less than `required` bytes free.
    ///
    /// Output that cannot be parsed skips the check with a warning.
    pub async fn ensure_remote_space(&self, dir: &str, required: u64) -> Result<()> {
        let stdout = self.execute("remote free space", &free_space_script(dir)).await?;
        match parse_df_available(&stdout) {
            Some(available) if available < required => Err(TransferError::InsufficientSpace {
                location: format!("{}:{}", self.slot.host(), dir),
                required,
                available,
            }
            .into()),
            Some(_) => Ok(()),
            None => {
                warn!(
                    "[Transfer] Could not read free space of {}: {}",
                    dir,
                    stdout.trim()
                );
                Ok(())
            }
        }
    }

    /// Downloads `artifact` into `staging` and checks its size.
    ///
    /// The artifact must be `Created`; it ends up `Transferred`.
    pub async fn download(
        &self,
        artifact: &mut BackupArtifact,
        staging: &StagingArea,
    ) -> Result<PathBuf> {
        let remote = artifact.remote_path().to_string();
        let expected = match artifact.size() {
            Some(size) => size,
            None => {
                let size = self.remote_size(&remote).await?.ok_or_else(|| {
                    SyncError::validation(
                        "artifact",
                        format!("remote file not found: {remote}"),
                    )
                })?;
                artifact.record_remote_size(size)?;
                size
            }
        };
        ensure_local_space(staging.path(), expected)?;

        let local = staging.download_path(artifact.file_name());
        info!(
            phase = "download",
            bytes = expected,
            "[Transfer] Downloading {} ({} bytes)",
            remote,
            expected
        );
        let options = self.transfer_options();
        self.slot
            .run(&RetryableOperation::network("download"), |session| {
                let (remote, local, options) = (&remote, &local, &options);
                async move { session.download(remote, local, options).await }
            })
            .await?;

        let actual = local_size(&local).await?;
        if actual != expected {
            return Err(TransferError::SizeMismatch {
                path: remote,
                expected,
                actual,
            }
            .into());
        }
        artifact.mark_transferred(&local)?;
        Ok(local)
    }

    /// Uploads `local` unless the remote file already has the same size.
    ///
    /// Returns whether anything was sent.
    pub async fn upload_if_needed(&self, local: &Path, remote: &str) -> Result<bool> {
        let size = local_size(local).await?;
        if self.remote_size(remote).await? == Some(size) {
            info!("[Transfer] {} already present with {} bytes", remote, size);
            return Ok(false);
        }
        if let Some((dir, _)) = remote.rsplit_once('/').filter(|(dir, _)| !dir.is_empty()) {
            self.execute(
                "remote mkdir",
                &RemoteCommand::new(format!("mkdir -p {}", shell_quote(dir))),
            )
            .await?;
        }

        info!(phase = "upload", bytes = size, "[Transfer] Uploading {} to {}", local.display(), remote);
        let options = self.transfer_options();
        self.slot
            .run(&RetryableOperation::network("upload"), |session| {
                let options = &options;
                async move { session.upload(local, remote, options).await }
            })
            .await?;

        match self.remote_size(remote).await? {
            Some(actual) if actual == size => Ok(true),
            actual => Err(TransferError::SizeMismatch {
                path: remote.to_string(),
                expected: size,
                actual: actual.unwrap_or(0),
            }
            .into()),
        }
    }

    /// Removes a remote file. Any failure comes back as `Cleanup`.
    pub async fn delete_remote(&self, path: &str) -> Result<()> {
        let command = RemoteCommand::new(format!("rm -f -- {}", shell_quote(path)));
        match self.execute("remote delete", &command).await {
            Ok(_) => {
                info!(phase = "cleanup", "[Transfer] Removed remote {}", path);
                Ok(())
            }
            Err(err) => Err(SyncError::Cleanup {
                path: path.to_string(),
                message: err.to_string(),
            }),
        }
    }
}

async fn local_size(path: &Path) -> Result<u64> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| {
            TransferError::Local {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
}
