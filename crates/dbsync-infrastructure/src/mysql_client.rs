//! [`SqlClient`] backed by the local `mysql` command-line client.

use crate::process::{run_captured, spawn_error, to_output};
use async_trait::async_trait;
use dbsync_core::command::ClientCommand;
use dbsync_core::error::TransferError;
use dbsync_core::plan::local_query;
use dbsync_core::plan::restore::ImportStep;
use dbsync_core::profile::DatabaseEndpoint;
use dbsync_core::session::{CommandOutput, ExecOptions, SqlClient};
use dbsync_core::{Result, SyncError};
use dbsync_execution::supervise;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct MysqlClient {
    /// Replaces the program named in each command line.
    program: Option<String>,
}

impl MysqlClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    fn command(&self, client: &ClientCommand) -> Command {
        let program = self
            .program
            .clone()
            .unwrap_or_else(|| client.line.program().to_string());
        let mut cmd = Command::new(program);
        cmd.args(client.line.arguments());
        for secret in &client.env {
            cmd.env(&secret.name, secret.value.expose());
        }
        cmd
    }
}

/// Writes prelude, body and epilogue. The epilogue goes out even when the
/// body fails part way.
async fn feed(mut stdin: ChildStdin, step: &ImportStep) -> std::io::Result<()> {
    let prelude = step.integrity.as_ref().map(|t| t.prelude());
    let epilogue = step.integrity.as_ref().map(|t| t.epilogue());

    let body = async {
        if let Some(prelude) = &prelude {
            stdin.write_all(prelude.as_bytes()).await?;
        }
        let mut source = tokio::fs::File::open(&step.source).await?;
        tokio::io::copy(&mut source, &mut stdin).await?;
        Ok::<_, std::io::Error>(())
    }
    .await;

    if let Some(epilogue) = &epilogue {
        if let Err(err) = stdin.write_all(epilogue.as_bytes()).await {
            if err.kind() != ErrorKind::BrokenPipe {
                warn!("[Import] Could not write integrity epilogue: {}", err);
            }
        }
    }
    let _ = stdin.shutdown().await;
    drop(stdin);
    body
}

fn feed_error(source: &Path, err: std::io::Error) -> SyncError {
    TransferError::Local {
        path: source.display().to_string(),
        message: err.to_string(),
    }
    .into()
}

#[async_trait]
impl SqlClient for MysqlClient {
    async fn query(
        &self,
        endpoint: &DatabaseEndpoint,
        sql: &str,
        options: &ExecOptions,
    ) -> Result<CommandOutput> {
        let client = local_query(endpoint, sql);
        debug!("[Import] query: {}", client.line);
        run_captured(self.command(&client), "local query", options).await
    }

    async fn import(&self, step: &ImportStep, options: &ExecOptions) -> Result<CommandOutput> {
        debug!("[Import] {}: {}", step.component, step.command.line);
        let mut cmd = self.command(&step.command);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let program = cmd.as_std().get_program().to_string_lossy().into_owned();
        let mut child = cmd.spawn().map_err(|e| spawn_error(&program, e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SyncError::io("client stdin was not captured"))?;

        let operation = format!("import {}", step.component);
        supervise(&operation, options, async move {
            let (fed, output) = tokio::join!(feed(stdin, step), child.wait_with_output());
            let output = to_output(output?);
            match fed {
                Err(err) if err.kind() != ErrorKind::BrokenPipe => {
                    Err(feed_error(&step.source, err))
                }
                // A broken pipe means the client exited early; its exit
                // status carries the reason.
                _ => Ok(output),
            }
        })
        .await
    }
}
