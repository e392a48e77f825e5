//! Configuration service.
//!
//! Loads the named configurations from `config.toml` and resolves one of
//! them into the profile, retry settings and timeouts an operation needs.

use crate::dto::ConfigRootDto;
use crate::paths::DbsyncPaths;
use dbsync_core::profile::ConnectionProfile;
use dbsync_core::session::OperationTimeouts;
use dbsync_core::{Result, SyncError};
use dbsync_execution::RetryConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Overrides `key_passphrase` for every configuration.
pub const PASSPHRASE_ENV: &str = "DBSYNC_SSH_KEY_PASSPHRASE";

/// One configuration, ready to use.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Table key in the configuration file.
    pub key: String,
    pub profile: ConnectionProfile,
    pub retry: RetryConfig,
    pub timeouts: OperationTimeouts,
}

#[derive(Debug, Clone)]
pub struct ConfigService {
    path: PathBuf,
    root: ConfigRootDto,
}

impl ConfigService {
    /// Loads the configuration file at `explicit`, `DBSYNC_CONFIG` or the
    /// default location.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let path = DbsyncPaths::config_file(explicit)?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SyncError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        let service = Self::from_toml(path, &text)?;
        debug!(
            "[Config] Loaded {} configuration(s) from {}",
            service.root.configurations.len(),
            path.display()
        );
        Ok(service)
    }

    pub fn from_toml(path: &Path, text: &str) -> Result<Self> {
        let root: ConfigRootDto = toml::from_str(text)?;
        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `(key, display name)` for every configuration, sorted by key.
    pub fn names(&self) -> Vec<(String, String)> {
        self.root
            .configurations
            .iter()
            .map(|(key, dto)| {
                let name = dto
                    .name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| key.clone());
                (key.clone(), name)
            })
            .collect()
    }

    /// The configuration to use when none was named: the only one there is.
    pub fn default_key(&self) -> Result<String> {
        let mut keys = self.root.configurations.keys();
        match (keys.next(), keys.next()) {
            (Some(key), None) => Ok(key.clone()),
            (None, _) => Err(SyncError::config(format!(
                "No configurations defined in {}",
                self.path.display()
            ))),
            (Some(_), Some(_)) => Err(SyncError::config(format!(
                "Several configurations defined, choose one of: {}",
                self.root
                    .configurations
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    pub fn resolve(&self, key: &str) -> Result<ResolvedConfig> {
        let passphrase = std::env::var(PASSPHRASE_ENV).ok();
        self.resolve_with(key, passphrase.as_deref())
    }

    fn resolve_with(&self, key: &str, passphrase_override: Option<&str>) -> Result<ResolvedConfig> {
        let dto = self.root.configurations.get(key).ok_or_else(|| {
            SyncError::config(format!(
                "Unknown configuration '{}' in {}",
                key,
                self.path.display()
            ))
        })?;
        Ok(ResolvedConfig {
            key: key.to_string(),
            profile: dto.to_profile(key, passphrase_override)?,
            retry: dto.retry.clone().unwrap_or_default().to_config(),
            timeouts: dto.timeouts.clone().unwrap_or_default().to_timeouts(),
        })
    }
}
