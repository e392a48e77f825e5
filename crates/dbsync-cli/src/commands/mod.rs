pub mod backup;
pub mod configs;
pub mod info;
pub mod list;
pub mod push;
pub mod restore;

use anyhow::{Context, Result};
use clap::Args;
use dbsync_application::SyncService;
use dbsync_core::selection::{Component, RestoreSpec};
use dbsync_execution::RetryPolicy;
use dbsync_infrastructure::{ConfigService, MysqlClient, OpenSshConfig, OpenSshConnector, ResolvedConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Global options shared by every command.
pub struct CliContext {
    pub config: Option<PathBuf>,
    pub name: Option<String>,
    pub json: bool,
    pub cancel: CancellationToken,
}

impl CliContext {
    pub fn load(&self) -> Result<ConfigService> {
        ConfigService::discover(self.config.as_deref()).context("Failed to load configuration")
    }

    /// The named configuration, or the only one in the file.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let configs = self.load()?;
        let key = match &self.name {
            Some(name) => name.clone(),
            None => configs.default_key()?,
        };
        configs
            .resolve(&key)
            .with_context(|| format!("Invalid configuration '{}'", key))
    }

    pub fn service(&self, config: ResolvedConfig) -> SyncService {
        SyncService::new(
            config.profile,
            Arc::new(OpenSshConnector::new(OpenSshConfig::default())),
            Arc::new(MysqlClient::new()),
        )
        .with_retry_policy(RetryPolicy::new(config.retry))
        .with_timeouts(config.timeouts)
        .with_cancellation(self.cancel.clone())
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Seconds from the command line; 0 removes the limit.
pub fn timeout_override(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Which optional components to restore. Table data is always restored.
#[derive(Args, Debug, Clone, Default)]
pub struct RestoreComponents {
    /// Restore stored procedures and functions
    #[arg(long)]
    pub routines: bool,
    /// Restore triggers
    #[arg(long)]
    pub triggers: bool,
    /// Restore views
    #[arg(long)]
    pub views: bool,
    /// Restore scheduled events
    #[arg(long)]
    pub events: bool,
    /// Restore every component
    #[arg(long, conflicts_with_all = ["routines", "triggers", "views", "events"])]
    pub all: bool,
}

impl RestoreComponents {
    pub fn to_spec(&self) -> RestoreSpec {
        if self.all {
            return RestoreSpec::everything();
        }
        let flags = [
            (Component::Routines, self.routines),
            (Component::Triggers, self.triggers),
            (Component::Views, self.views),
            (Component::Events, self.events),
        ];
        RestoreSpec::from_components(flags.into_iter().filter(|(_, on)| *on).map(|(c, _)| c))
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
