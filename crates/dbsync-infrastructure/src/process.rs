//! Spawning local processes under supervision.

use dbsync_core::session::{CommandOutput, ExecOptions};
use dbsync_core::{Result, SyncError};
use dbsync_execution::supervise;
use std::io::ErrorKind;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub(crate) fn to_output(output: Output) -> CommandOutput {
    CommandOutput {
        // Killed by a signal.
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

pub(crate) fn spawn_error(program: &str, err: std::io::Error) -> SyncError {
    SyncError::io(format!("failed to start '{program}': {err}"))
}

/// Runs `command` to completion with stdout and stderr captured.
///
/// The child is killed when the call is cancelled or times out.
pub(crate) async fn run_captured(
    mut command: Command,
    operation: &str,
    options: &ExecOptions,
) -> Result<CommandOutput> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = command.spawn().map_err(|e| spawn_error(&program, e))?;
    supervise(operation, options, async move {
        let output = child.wait_with_output().await?;
        Ok(to_output(output))
    })
    .await
}

/// Like [`run_captured`], but writes `input` to the child's stdin first.
///
/// Keeps data such as secrets out of the argument list. A child that exits
/// without reading all of its input is not an error here.
pub(crate) async fn run_with_input(
    mut command: Command,
    input: Vec<u8>,
    operation: &str,
    options: &ExecOptions,
) -> Result<CommandOutput> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = command.spawn().map_err(|e| spawn_error(&program, e))?;
    let stdin = child.stdin.take();
    supervise(operation, options, async move {
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&input).await {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;
        Ok(to_output(output))
    })
    .await
}
