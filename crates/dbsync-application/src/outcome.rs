//! Structured results of the sync operations.

use dbsync_core::SyncError;
use dbsync_core::artifact::BackupArtifact;
use dbsync_core::engine::EngineProfile;
use dbsync_core::selection::Component;
use serde::Serialize;
use std::time::Duration;

/// What happened to the remote copy after a download.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupReport {
    NotRequested,
    Removed,
    /// Removal failed; the restore itself was not affected.
    Failed { error: SyncError },
}

impl CleanupReport {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    /// The artifact in state `Created`, with its size.
    pub artifact: BackupArtifact,
    pub engine: EngineProfile,
    pub components: Vec<Component>,
    /// Whether the faster privileged options were used.
    pub privileged: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    /// The artifact in state `Consumed`.
    pub artifact: BackupArtifact,
    /// Destination engine the plan was made for.
    pub engine: EngineProfile,
    /// Components applied, in import order.
    pub restored: Vec<Component>,
    pub cleanup: CleanupReport,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushOutcome {
    pub remote_path: String,
    pub size_bytes: u64,
    /// False when an identical-size file was already there.
    pub uploaded: bool,
}
