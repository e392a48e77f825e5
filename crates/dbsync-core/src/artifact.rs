//! Dump artifacts: lifecycle, section markers and remote listings.

use crate::error::{Result, SyncError};
use crate::selection::{Component, Compression, RestoreSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Prefix of the comment line that opens each section of a dump.
pub const SECTION_MARKER_PREFIX: &str = "-- dbsync:section ";

/// The marker line for a component, without trailing newline.
pub fn section_marker(component: Component) -> String {
    format!("{SECTION_MARKER_PREFIX}{component}")
}

/// Recognizes a section marker line.
pub fn parse_section_marker(line: &str) -> Option<Component> {
    line.trim_end_matches(['\r', '\n'])
        .strip_prefix(SECTION_MARKER_PREFIX)
        .and_then(|name| name.trim().parse().ok())
}

/// Lifecycle of a dump file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactState {
    Planned,
    Created,
    Transferred,
    Validated,
    Consumed,
    Deleted,
}

/// A dump file on the source host and, once transferred, its local copy.
///
/// Transitions only move forward:
/// `Planned -> Created -> Transferred -> Validated -> Consumed`.
/// `Deleted` is reachable from any state after `Planned` and marks an
/// artifact that will not be restored. Removing the remote copy after a
/// download is tracked separately and does not change the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    remote_path: String,
    compression: Compression,
    state: ArtifactState,
    size: Option<u64>,
    local_path: Option<PathBuf>,
    delete_after_transfer: bool,
    remote_removed: bool,
}

impl BackupArtifact {
    /// An artifact the backup planner is about to produce.
    pub fn planned(remote_path: impl Into<String>, compression: Compression) -> Self {
        Self {
            remote_path: remote_path.into(),
            compression,
            state: ArtifactState::Planned,
            size: None,
            local_path: None,
            delete_after_transfer: false,
            remote_removed: false,
        }
    }

    /// An artifact that already exists on the source host.
    pub fn existing(remote_path: impl Into<String>) -> Result<Self> {
        let remote_path = remote_path.into();
        let compression = Compression::from_path(&remote_path).ok_or_else(|| {
            SyncError::validation(
                "artifact",
                format!("'{remote_path}' is not a .sql or .sql.gz file"),
            )
        })?;
        Ok(Self {
            state: ArtifactState::Created,
            ..Self::planned(remote_path, compression)
        })
    }

    pub fn with_delete_after_transfer(mut self, delete: bool) -> Self {
        self.delete_after_transfer = delete;
        self
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn file_name(&self) -> &str {
        self.remote_path
            .rsplit('/')
            .next()
            .unwrap_or(self.remote_path.as_str())
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn state(&self) -> ArtifactState {
        self.state
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn delete_after_transfer(&self) -> bool {
        self.delete_after_transfer
    }

    pub fn remote_removed(&self) -> bool {
        self.remote_removed
    }

    fn transition(&mut self, allowed: &[ArtifactState], next: ArtifactState) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(SyncError::invalid_state(format!(
                "artifact '{}' cannot move from {} to {}",
                self.remote_path, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn mark_created(&mut self, size: u64) -> Result<()> {
        self.transition(&[ArtifactState::Planned], ArtifactState::Created)?;
        self.size = Some(size);
        Ok(())
    }

    /// Records the remote size of an existing artifact.
    pub fn record_remote_size(&mut self, size: u64) -> Result<()> {
        if self.state != ArtifactState::Created {
            return Err(SyncError::invalid_state(format!(
                "remote size of '{}' can only be recorded before transfer",
                self.remote_path
            )));
        }
        self.size = Some(size);
        Ok(())
    }

    pub fn mark_transferred(&mut self, local_path: impl Into<PathBuf>) -> Result<()> {
        self.transition(&[ArtifactState::Created], ArtifactState::Transferred)?;
        self.local_path = Some(local_path.into());
        Ok(())
    }

    pub fn mark_validated(&mut self) -> Result<()> {
        self.transition(&[ArtifactState::Transferred], ArtifactState::Validated)
    }

    pub fn mark_consumed(&mut self) -> Result<()> {
        self.transition(&[ArtifactState::Validated], ArtifactState::Consumed)
    }

    pub fn mark_deleted(&mut self) -> Result<()> {
        self.transition(
            &[
                ArtifactState::Created,
                ArtifactState::Transferred,
                ArtifactState::Validated,
            ],
            ArtifactState::Deleted,
        )
    }

    /// The remote copy was removed after a successful download.
    pub fn mark_remote_removed(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ArtifactState::Transferred | ArtifactState::Validated | ArtifactState::Consumed
        ) {
            return Err(SyncError::invalid_state(format!(
                "remote copy of '{}' removed before it was transferred",
                self.remote_path
            )));
        }
        self.remote_removed = true;
        Ok(())
    }
}

/// Which components a validated artifact actually contains.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArtifactManifest {
    components: BTreeSet<Component>,
    /// False for dumps without section markers, which count as table data only.
    sectioned: bool,
}

impl ArtifactManifest {
    pub fn sectioned<I>(components: I) -> Self
    where
        I: IntoIterator<Item = Component>,
    {
        Self {
            components: components.into_iter().collect(),
            sectioned: true,
        }
    }

    pub fn unsectioned() -> Self {
        Self {
            components: BTreeSet::from([Component::TableData]),
            sectioned: false,
        }
    }

    pub fn contains(&self, component: Component) -> bool {
        self.components.contains(&component)
    }

    pub fn is_sectioned(&self) -> bool {
        self.sectioned
    }

    /// Contained components in restore order.
    pub fn components(&self) -> Vec<Component> {
        self.components.iter().copied().collect()
    }

    /// Requested components the artifact does not hold, in restore order.
    pub fn missing_from(&self, spec: &RestoreSpec) -> Vec<Component> {
        spec.requested()
            .into_iter()
            .filter(|c| !self.contains(*c))
            .collect()
    }
}

/// One dump file found in the remote backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBackupEntry {
    pub path: String,
    pub name: String,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
    pub compression: Compression,
}

impl RemoteBackupEntry {
    /// Parses `size<TAB>mtime<TAB>path` lines, newest name first.
    ///
    /// Lines that do not parse, and files that are not dumps, are skipped.
    pub fn parse_listing(output: &str) -> Vec<Self> {
        let mut entries: Vec<Self> = output
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, '\t');
                let size_bytes = parts.next()?.trim().parse::<u64>().ok()?;
                let mtime = parts.next()?.trim().parse::<i64>().ok();
                let path = parts.next()?.trim().to_string();
                let compression = Compression::from_path(&path)?;
                let name = path.rsplit('/').next().unwrap_or(path.as_str()).to_string();
                Some(Self {
                    name,
                    size_bytes,
                    modified: mtime.and_then(|secs| DateTime::from_timestamp(secs, 0)),
                    compression,
                    path,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.name.cmp(&a.name));
        entries.dedup_by(|a, b| a.path == b.path);
        entries
    }
}
