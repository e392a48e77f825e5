//! Capability detection against the source or the destination server.

use crate::session_slot::SessionSlot;
use async_trait::async_trait;
use dbsync_core::engine::{EngineProfile, ServerInfo, ServerVariables, grants_are_privileged};
use dbsync_core::plan::{queries, remote_query};
use dbsync_core::profile::DatabaseEndpoint;
use dbsync_core::session::{ExecOptions, SqlClient};
use dbsync_core::Result;
use dbsync_execution::RetryableOperation;
use tracing::{info, warn};

/// Runs one statement and returns its batch output.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn query(&self, sql: &str) -> Result<String>;
}

/// Queries the source server through the client on the SSH host.
pub struct RemoteQueryRunner<'a> {
    slot: &'a SessionSlot,
    endpoint: &'a DatabaseEndpoint,
    options: ExecOptions,
}

impl<'a> RemoteQueryRunner<'a> {
    pub fn new(slot: &'a SessionSlot, endpoint: &'a DatabaseEndpoint, options: ExecOptions) -> Self {
        Self {
            slot,
            endpoint,
            options,
        }
    }
}

#[async_trait]
impl QueryRunner for RemoteQueryRunner<'_> {
    async fn query(&self, sql: &str) -> Result<String> {
        let command = remote_query(self.endpoint, sql);
        let operation = RetryableOperation::network("remote query");
        let output = self
            .slot
            .run(&operation, |session| {
                let command = &command;
                let options = &self.options;
                async move { session.execute(command, options).await }
            })
            .await?;
        Ok(output.into_result(&command.redacted())?.stdout)
    }
}

/// Queries the destination server through the local client.
pub struct LocalQueryRunner<'a> {
    client: &'a dyn SqlClient,
    endpoint: &'a DatabaseEndpoint,
    options: ExecOptions,
}

impl<'a> LocalQueryRunner<'a> {
    pub fn new(client: &'a dyn SqlClient, endpoint: &'a DatabaseEndpoint, options: ExecOptions) -> Self {
        Self {
            client,
            endpoint,
            options,
        }
    }
}

#[async_trait]
impl QueryRunner for LocalQueryRunner<'_> {
    async fn query(&self, sql: &str) -> Result<String> {
        let output = self.client.query(self.endpoint, sql, &self.options).await?;
        Ok(output.into_result(&format!("mysql --execute {sql:?}"))?.stdout)
    }
}

pub struct CapabilityDetector;

impl CapabilityDetector {
    /// Reads `VERSION()` and maps it onto a capability tag.
    ///
    /// An unparseable answer is an error; callers that want to carry on use
    /// [`EngineProfile::conservative`] themselves.
    pub async fn detect(runner: &dyn QueryRunner) -> Result<EngineProfile> {
        let output = runner.query(queries::VERSION).await?;
        let engine = EngineProfile::from_version_output(&output)?;
        info!("[Detect] Server is {}", engine.describe());
        Ok(engine)
    }

    /// Whether the connected user holds grants for the faster options.
    ///
    /// Failing to read grants counts as unprivileged. Cancellation is
    /// returned as is.
    pub async fn privileged(runner: &dyn QueryRunner) -> Result<bool> {
        match runner.query(queries::GRANTS).await {
            Ok(grants) => Ok(grants_are_privileged(&grants)),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                warn!("[Detect] Could not read grants, assuming none: {}", err);
                Ok(false)
            }
        }
    }

    /// Size of `database` in bytes, if the server reports it.
    pub async fn database_size(runner: &dyn QueryRunner, database: &str) -> Result<Option<u64>> {
        match runner.query(&queries::database_size(database)).await {
            Ok(output) => Ok(output
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .and_then(|l| l.parse::<f64>().ok())
                .map(|bytes| bytes as u64)),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                warn!("[Detect] Could not read size of '{}': {}", database, err);
                Ok(None)
            }
        }
    }

    /// Version, variables, grants and size in one report.
    pub async fn server_info(runner: &dyn QueryRunner, database: &str) -> Result<ServerInfo> {
        let engine = Self::detect(runner).await?;
        let variables = match runner.query(queries::VARIABLES).await {
            Ok(output) => ServerVariables::parse(&output),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                warn!("[Detect] Could not read server variables: {}", err);
                ServerVariables::default()
            }
        };
        let privileged = Self::privileged(runner).await?;
        let database_size_bytes = Self::database_size(runner, database).await?;
        Ok(ServerInfo {
            engine,
            variables,
            privileged,
            database_size_bytes,
        })
    }
}
