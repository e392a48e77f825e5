//! Turns a validated artifact and a [`RestoreSpec`] into ordered import steps.

use super::{CLIENT_PROGRAM, PASSWORD_ENV, connection_args};
use crate::artifact::ArtifactManifest;
use crate::command::{ClientCommand, CommandLine};
use crate::engine::EngineProfile;
use crate::error::{Result, SyncError};
use crate::profile::DatabaseEndpoint;
use crate::selection::{Component, RestoreSpec};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Session statements wrapped around the table data import.
///
/// Scoped to the import connection, so nothing leaks into other sessions
/// on the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityToggle {
    relax: Vec<&'static str>,
    restore: Vec<&'static str>,
}

impl IntegrityToggle {
    pub fn session(privileged: bool) -> Self {
        let mut relax = vec![
            "SET SESSION FOREIGN_KEY_CHECKS=0",
            "SET SESSION UNIQUE_CHECKS=0",
        ];
        let mut restore = vec![
            "SET SESSION FOREIGN_KEY_CHECKS=1",
            "SET SESSION UNIQUE_CHECKS=1",
        ];
        if privileged {
            relax.push("SET SESSION sql_log_bin=0");
            restore.push("SET SESSION sql_log_bin=1");
        }
        Self { relax, restore }
    }

    /// Written before the section body.
    pub fn prelude(&self) -> String {
        self.relax.iter().map(|s| format!("{s};\n")).collect()
    }

    /// Written after the section body, whatever happened to it.
    pub fn epilogue(&self) -> String {
        let body: String = self.restore.iter().map(|s| format!("{s};\n")).collect();
        format!("\n{body}")
    }
}

/// Per-component files split out of a validated artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub manifest: ArtifactManifest,
    pub sections: BTreeMap<Component, PathBuf>,
}

/// One client invocation that applies one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStep {
    pub component: Component,
    pub command: ClientCommand,
    pub source: PathBuf,
    pub integrity: Option<IntegrityToggle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestorePlan {
    pub steps: Vec<ImportStep>,
}

impl RestorePlan {
    pub fn components(&self) -> Vec<Component> {
        self.steps.iter().map(|s| s.component).collect()
    }
}

pub struct RestorePlanner<'a> {
    endpoint: &'a DatabaseEndpoint,
    privileged: bool,
}

impl<'a> RestorePlanner<'a> {
    pub fn new(endpoint: &'a DatabaseEndpoint) -> Self {
        Self {
            endpoint,
            privileged: false,
        }
    }

    /// Also suspend binary logging during the data load.
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Plans the restore, or fails before anything is imported.
    ///
    /// Checks run in this order: components missing from the artifact
    /// (`PartialSource`), then components the destination engine cannot
    /// take (`Unsupported`).
    pub fn plan(
        &self,
        spec: &RestoreSpec,
        engine: &EngineProfile,
        staged: &StagedArtifact,
    ) -> Result<RestorePlan> {
        let missing = staged.manifest.missing_from(spec);
        if !missing.is_empty() {
            return Err(SyncError::PartialSource { missing });
        }
        engine.ensure_supports(spec.requested())?;

        let steps = spec
            .requested()
            .into_iter()
            .map(|component| {
                let source = staged.sections.get(&component).cloned().ok_or_else(|| {
                    SyncError::invalid_state(format!(
                        "staged artifact lists {component} but has no section file"
                    ))
                })?;
                Ok(ImportStep {
                    component,
                    command: self.command(component),
                    source,
                    integrity: (component == Component::TableData)
                        .then(|| IntegrityToggle::session(self.privileged)),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RestorePlan { steps })
    }

    fn command(&self, component: Component) -> ClientCommand {
        let mut line = CommandLine::new(CLIENT_PROGRAM)
            .args(connection_args(self.endpoint))
            .args(["--default-character-set=utf8mb4", "--max-allowed-packet=512M"]);
        if component == Component::TableData && self.privileged {
            line = line.arg("--net-buffer-length=16384");
        }
        ClientCommand::new(line.arg(self.endpoint.database.clone()))
            .with_secret(PASSWORD_ENV, self.endpoint.password.clone())
    }
}
