//! What a backup captures and what a restore applies.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{EnumIter, IntoEnumIterator};

/// A restorable part of a database dump.
///
/// Declaration order is the restore order: table data first, then
/// routines, triggers, views and events. `Ord` follows that order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Component {
    TableData,
    Routines,
    Triggers,
    Views,
    Events,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Everything except table data, in restore order.
    pub fn optional() -> impl Iterator<Item = Component> {
        Component::iter().filter(|c| c.is_optional())
    }

    pub fn is_optional(self) -> bool {
        self != Component::TableData
    }
}

/// How the dump file is stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Plain,
    #[default]
    Gzip,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Compression::Plain => ".sql",
            Compression::Gzip => ".sql.gz",
        }
    }

    /// Infers the compression from a dump file name.
    pub fn from_path(path: &str) -> Option<Self> {
        if path.ends_with(".sql.gz") {
            Some(Compression::Gzip)
        } else if path.ends_with(".sql") {
            Some(Compression::Plain)
        } else {
            None
        }
    }
}

/// Describes which database objects a backup captures.
///
/// Table data is always captured. Built with the `with_*` methods and
/// read-only once handed to the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSpec {
    routines: bool,
    triggers: bool,
    views: bool,
    events: bool,
    compression: Compression,
    delete_after_transfer: bool,
    excluded_tables: Vec<String>,
    file_name: Option<String>,
}

impl Default for BackupSpec {
    fn default() -> Self {
        Self {
            routines: true,
            triggers: true,
            views: true,
            events: false,
            compression: Compression::Gzip,
            delete_after_transfer: false,
            excluded_tables: Vec::new(),
            file_name: None,
        }
    }
}

impl BackupSpec {
    /// Table data only, gzip compressed.
    pub fn tables_only() -> Self {
        Self {
            routines: false,
            triggers: false,
            views: false,
            events: false,
            ..Self::default()
        }
    }

    pub fn with_component(mut self, component: Component, enabled: bool) -> Self {
        match component {
            Component::TableData => {}
            Component::Routines => self.routines = enabled,
            Component::Triggers => self.triggers = enabled,
            Component::Views => self.views = enabled,
            Component::Events => self.events = enabled,
        }
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_delete_after_transfer(mut self, delete: bool) -> Self {
        self.delete_after_transfer = delete;
        self
    }

    pub fn with_excluded_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the generated artifact file name.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn includes(&self, component: Component) -> bool {
        match component {
            Component::TableData => true,
            Component::Routines => self.routines,
            Component::Triggers => self.triggers,
            Component::Views => self.views,
            Component::Events => self.events,
        }
    }

    /// Captured components in restore order, table data first.
    pub fn components(&self) -> Vec<Component> {
        Component::iter().filter(|c| self.includes(*c)).collect()
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn delete_after_transfer(&self) -> bool {
        self.delete_after_transfer
    }

    pub fn excluded_tables(&self) -> &[String] {
        &self.excluded_tables
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn validate(&self) -> Result<()> {
        for table in &self.excluded_tables {
            validate_identifier("excluded_tables", table)?;
        }
        if let Some(name) = &self.file_name {
            if name.is_empty() || name.contains('/') {
                return Err(SyncError::validation(
                    "file_name",
                    format!("'{name}' must be a bare file name"),
                ));
            }
            if Compression::from_path(name) != Some(self.compression) {
                return Err(SyncError::validation(
                    "file_name",
                    format!(
                        "'{name}' must end with {}",
                        self.compression.extension()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Which optional components a restore applies on top of table data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RestoreSpec {
    components: BTreeSet<Component>,
}

impl RestoreSpec {
    /// Table data only.
    pub fn tables_only() -> Self {
        Self::default()
    }

    /// Table data plus every optional component.
    pub fn everything() -> Self {
        Self {
            components: Component::optional().collect(),
        }
    }

    /// Table data is implicit, so passing it here has no effect.
    pub fn with(mut self, component: Component) -> Self {
        if component.is_optional() {
            self.components.insert(component);
        }
        self
    }

    pub fn without(mut self, component: Component) -> Self {
        self.components.remove(&component);
        self
    }

    pub fn from_components<I>(components: I) -> Self
    where
        I: IntoIterator<Item = Component>,
    {
        components
            .into_iter()
            .fold(Self::default(), |spec, c| spec.with(c))
    }

    pub fn includes(&self, component: Component) -> bool {
        component == Component::TableData || self.components.contains(&component)
    }

    /// Requested components in restore order, table data first.
    pub fn requested(&self) -> Vec<Component> {
        Component::iter().filter(|c| self.includes(*c)).collect()
    }
}

/// Rejects names that cannot be safely spliced into dump options.
pub fn validate_identifier(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::validation(field, "must not be empty"));
    }
    if name
        .chars()
        .any(|c| matches!(c, '`' | '\'' | '"' | '\\' | '\n' | '\r' | '\0') || c.is_whitespace())
    {
        return Err(SyncError::validation(
            field,
            format!("'{name}' contains characters that are not allowed"),
        ));
    }
    Ok(())
}
