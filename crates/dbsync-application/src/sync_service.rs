//! Backup and restore orchestration.
//!
//! `SyncService` is the operation surface front ends call. Each operation
//! opens its own session, releases it on every exit path and returns a
//! structured outcome or a `SyncError`. Nothing here prints.

use crate::detector::{CapabilityDetector, LocalQueryRunner, RemoteQueryRunner};
use crate::outcome::{BackupOutcome, CleanupReport, PushOutcome, RestoreOutcome};
use crate::session_slot::SessionSlot;
use crate::transfer::TransferManager;
use chrono::Local;
use dbsync_core::artifact::{ArtifactState, BackupArtifact, RemoteBackupEntry};
use dbsync_core::engine::ServerInfo;
use dbsync_core::plan::backup::{BackupPlanner, default_file_name};
use dbsync_core::plan::restore::RestorePlanner;
use dbsync_core::profile::ConnectionProfile;
use dbsync_core::selection::{BackupSpec, Compression, RestoreSpec};
use dbsync_core::session::{ExecOptions, OperationTimeouts, SessionConnector, SqlClient};
use dbsync_core::{Result, SyncError};
use dbsync_execution::{RetryPolicy, RetryableOperation};
use dbsync_infrastructure::staging::StagingArea;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

pub struct SyncService {
    profile: ConnectionProfile,
    connector: Arc<dyn SessionConnector>,
    client: Arc<dyn SqlClient>,
    policy: RetryPolicy,
    timeouts: OperationTimeouts,
    cancel: CancellationToken,
}

impl SyncService {
    pub fn new(
        profile: ConnectionProfile,
        connector: Arc<dyn SessionConnector>,
        client: Arc<dyn SqlClient>,
    ) -> Self {
        Self {
            profile,
            connector,
            client,
            policy: RetryPolicy::default(),
            timeouts: OperationTimeouts::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Cancelling `token` stops the running operation at the next await.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    fn slot(&self) -> SessionSlot {
        SessionSlot::new(
            self.connector.clone(),
            self.profile.ssh.clone(),
            self.policy.clone(),
            self.cancel.clone(),
        )
    }

    fn options(&self, timeout: Option<std::time::Duration>) -> ExecOptions {
        ExecOptions::new(self.cancel.clone()).with_timeout(timeout)
    }

    /// Version, variables, grants and size of the source database.
    pub async fn detect_server_info(&self) -> Result<ServerInfo> {
        self.profile.validate()?;
        let slot = self.slot();
        let result = async {
            let runner =
                RemoteQueryRunner::new(&slot, &self.profile.source, self.options(self.timeouts.query));
            CapabilityDetector::server_info(&runner, &self.profile.source.database).await
        }
        .instrument(info_span!("detect", config = %self.profile.name))
        .await;
        slot.close().await;
        result
    }

    /// Dumps the source database into the remote backup directory.
    ///
    /// The returned artifact is `Created`; nothing is downloaded.
    pub async fn create_backup(&self, spec: &BackupSpec) -> Result<BackupOutcome> {
        self.profile.validate()?;
        spec.validate()?;
        let slot = self.slot();
        let result = self
            .run_backup(&slot, spec)
            .instrument(info_span!("backup", config = %self.profile.name))
            .await;
        slot.close().await;
        result
    }

    async fn run_backup(&self, slot: &SessionSlot, spec: &BackupSpec) -> Result<BackupOutcome> {
        let started = Instant::now();
        let source = &self.profile.source;

        info!(phase = "connect", "[Backup] Connecting to {}", self.profile.ssh.host);
        slot.connect().await?;

        info!(phase = "detect", "[Backup] Detecting source server");
        let runner = RemoteQueryRunner::new(slot, source, self.options(self.timeouts.query));
        let engine = CapabilityDetector::detect(&runner).await?;
        let privileged = CapabilityDetector::privileged(&runner).await?;
        let database_size = CapabilityDetector::database_size(&runner, &source.database).await?;

        let file_name = match spec.file_name() {
            Some(name) => name.to_string(),
            None => default_file_name(&source.database, Local::now(), spec.compression()),
        };
        let remote_path = self.profile.remote_path(&file_name);
        let plan = BackupPlanner::new(source)
            .privileged(privileged)
            .plan(spec, &engine, &remote_path)?;

        let transfer = TransferManager::new(slot, &self.timeouts);
        if let Some(required) = database_size {
            transfer
                .ensure_remote_space(&self.profile.backup_dir, required)
                .await?;
        }

        info!(
            phase = "dump",
            components = ?plan.components(),
            "[Backup] Dumping {} to {}",
            source.database,
            remote_path
        );
        let options = self
            .options(self.timeouts.dump)
            .with_terminate_remote(true);
        let command = &plan.command;
        let output = slot
            .run(&RetryableOperation::network("dump"), |session| {
                let options = &options;
                async move { session.execute(command, options).await }
            })
            .await?
            .into_result(&command.redacted())?;

        let size = output
            .stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .and_then(|l| l.parse::<u64>().ok())
            .ok_or_else(|| {
                SyncError::execution(
                    command.redacted(),
                    Some(output.exit_code),
                    format!("dump finished without reporting a size: {}", output.stdout.trim()),
                )
            })?;

        let mut artifact = plan.artifact;
        artifact.mark_created(size)?;
        info!(
            phase = "done",
            bytes = size,
            "[Backup] Created {} ({} bytes)",
            artifact.remote_path(),
            size
        );
        Ok(BackupOutcome {
            components: plan.passes.iter().map(|p| p.component).collect(),
            artifact,
            engine,
            privileged,
            elapsed: started.elapsed(),
        })
    }

    /// Dumps in the remote backup directory, newest name first.
    pub async fn list_existing_backups(&self) -> Result<Vec<RemoteBackupEntry>> {
        self.profile.validate()?;
        let slot = self.slot();
        let result = TransferManager::new(&slot, &self.timeouts)
            .list(&self.profile.backup_dir)
            .instrument(info_span!("list", config = %self.profile.name))
            .await;
        slot.close().await;
        result
    }

    /// Downloads, validates and imports `artifact` into the destination.
    ///
    /// Requested components missing from the artifact fail the restore
    /// before anything is imported. A failed remote cleanup is reported in
    /// the outcome and does not fail the restore.
    pub async fn restore_backup(
        &self,
        artifact: BackupArtifact,
        spec: &RestoreSpec,
    ) -> Result<RestoreOutcome> {
        self.profile.validate()?;
        if artifact.state() != ArtifactState::Created {
            return Err(SyncError::invalid_state(format!(
                "artifact '{}' is {}, only created artifacts can be restored",
                artifact.remote_path(),
                artifact.state()
            )));
        }
        let staging = StagingArea::create(&self.profile.staging_dir)?;
        self.run_restore(artifact, spec, &staging)
            .instrument(info_span!("restore", config = %self.profile.name))
            .await
    }

    async fn run_restore(
        &self,
        mut artifact: BackupArtifact,
        spec: &RestoreSpec,
        staging: &StagingArea,
    ) -> Result<RestoreOutcome> {
        let started = Instant::now();

        let slot = self.slot();
        let fetched = self.fetch(&slot, &mut artifact, staging).await;
        slot.close().await;
        let (local, cleanup) = fetched?;

        info!(phase = "validate", "[Restore] Validating {}", local.display());
        let staged = staging.stage(&local, artifact.compression()).await?;
        artifact.mark_validated()?;

        let missing = staged.manifest.missing_from(spec);
        if !missing.is_empty() {
            return Err(SyncError::PartialSource { missing });
        }

        info!(phase = "detect", "[Restore] Detecting destination server");
        let destination = &self.profile.destination;
        let runner = LocalQueryRunner::new(
            self.client.as_ref(),
            destination,
            self.options(self.timeouts.query),
        );
        let engine = CapabilityDetector::detect(&runner).await?;
        let privileged = CapabilityDetector::privileged(&runner).await?;

        let plan = RestorePlanner::new(destination)
            .privileged(privileged)
            .plan(spec, &engine, &staged)?;

        let options = self.options(self.timeouts.import);
        for step in &plan.steps {
            info!(
                phase = "import",
                component = step.component.as_str(),
                "[Restore] Importing {} into {}",
                step.component,
                destination.database
            );
            self.client
                .import(step, &options)
                .await?
                .into_result(&step.command.line.to_string())?;
        }
        artifact.mark_consumed()?;

        info!(phase = "done", "[Restore] Restored {} into {}", artifact.file_name(), destination.database);
        Ok(RestoreOutcome {
            restored: plan.components(),
            artifact,
            engine,
            cleanup,
            elapsed: started.elapsed(),
        })
    }

    /// Download plus the optional remote removal.
    async fn fetch(
        &self,
        slot: &SessionSlot,
        artifact: &mut BackupArtifact,
        staging: &StagingArea,
    ) -> Result<(std::path::PathBuf, CleanupReport)> {
        let transfer = TransferManager::new(slot, &self.timeouts);
        let local = transfer.download(artifact, staging).await?;

        let cleanup = if !artifact.delete_after_transfer() {
            CleanupReport::NotRequested
        } else {
            match transfer.delete_remote(artifact.remote_path()).await {
                Ok(()) => {
                    artifact.mark_remote_removed()?;
                    CleanupReport::Removed
                }
                Err(error) => {
                    warn!("[Restore] {}", error);
                    CleanupReport::Failed { error }
                }
            }
        };
        Ok((local, cleanup))
    }

    /// Uploads a local dump into the remote backup directory unless an
    /// identical-size copy is already there.
    pub async fn push_backup(&self, local: &Path) -> Result<PushOutcome> {
        self.profile.validate()?;
        let file_name = local
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| Compression::from_path(n).is_some())
            .ok_or_else(|| {
                SyncError::validation(
                    "file",
                    format!("'{}' is not a .sql or .sql.gz file", local.display()),
                )
            })?;
        let remote_path = self.profile.remote_path(file_name);

        let slot = self.slot();
        let transfer = TransferManager::new(&slot, &self.timeouts);
        let result = async {
            let uploaded = transfer.upload_if_needed(local, &remote_path).await?;
            let size_bytes = tokio::fs::metadata(local).await?.len();
            Ok::<_, SyncError>(PushOutcome {
                remote_path: remote_path.clone(),
                size_bytes,
                uploaded,
            })
        }
        .instrument(info_span!("push", config = %self.profile.name))
        .await;
        slot.close().await;
        result
    }
}
