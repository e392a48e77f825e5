//! On-disk configuration DTOs (`config.toml`).
//!
//! Every field is optional at the serde level so that one pass can report
//! all missing required fields at once instead of failing on the first.

use crate::paths::expand_tilde;
use dbsync_core::profile::{ConnectionProfile, DatabaseEndpoint, Secret, SshAuth, SshEndpoint};
use dbsync_core::session::OperationTimeouts;
use dbsync_core::{Result, SyncError};
use dbsync_execution::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// DTOs
// ============================================================================

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigRootDto {
    /// Named configurations keyed by their table name.
    #[serde(default)]
    pub configurations: BTreeMap<String, ConfigurationDto>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigurationDto {
    /// Display name; the table key is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<DatabaseDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<DatabaseDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<TimeoutsDto>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SshDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Offer `password` when the key is rejected.
    #[serde(default)]
    pub allow_password_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
}

/// Time limits in seconds. `0` means unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutsDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_secs: Option<u64>,
}

// ============================================================================
// Conversion to domain types
// ============================================================================

/// Collects the dotted paths of required fields that are absent or blank.
#[derive(Default)]
struct MissingFields(Vec<String>);

impl MissingFields {
    fn take(&mut self, field: &str, value: Option<&String>) -> String {
        match value.map(|v| v.trim()).filter(|v| !v.is_empty()) {
            Some(v) => v.to_string(),
            None => {
                self.0.push(field.to_string());
                String::new()
            }
        }
    }

    fn note(&mut self, field: &str) {
        self.0.push(field.to_string());
    }
}

fn non_empty(value: &Option<String>) -> Option<&String> {
    value.as_ref().filter(|v| !v.is_empty())
}

impl DatabaseDto {
    fn to_endpoint(
        &self,
        prefix: &str,
        default_host: Option<&str>,
        missing: &mut MissingFields,
    ) -> DatabaseEndpoint {
        let host = match (non_empty(&self.host), default_host) {
            (Some(host), _) => host.clone(),
            (None, Some(fallback)) => fallback.to_string(),
            (None, None) => missing.take(&format!("{prefix}.host"), None),
        };
        DatabaseEndpoint {
            host,
            port: self.port.unwrap_or(DatabaseEndpoint::DEFAULT_PORT),
            user: missing.take(&format!("{prefix}.user"), self.user.as_ref()),
            password: Secret::new(self.password.clone().unwrap_or_default()),
            database: missing.take(&format!("{prefix}.database"), self.database.as_ref()),
        }
    }
}

impl SshDto {
    fn to_endpoint(
        &self,
        passphrase_override: Option<&str>,
        missing: &mut MissingFields,
    ) -> SshEndpoint {
        let password = non_empty(&self.password).map(|p| Secret::new(p.clone()));
        let auth = match (&self.key_path, password) {
            (Some(path), password) => {
                let passphrase = passphrase_override
                    .map(str::to_string)
                    .or_else(|| self.key_passphrase.clone())
                    .filter(|p| !p.is_empty())
                    .map(Secret::new);
                SshAuth::Key {
                    path: expand_tilde(path),
                    passphrase,
                    password_fallback: password.filter(|_| self.allow_password_fallback),
                }
            }
            (None, Some(password)) => SshAuth::Password { password },
            (None, None) => {
                missing.note("ssh.key_path or ssh.password");
                SshAuth::Password {
                    password: Secret::default(),
                }
            }
        };
        SshEndpoint {
            host: missing.take("ssh.host", self.host.as_ref()),
            port: self.port.unwrap_or(SshEndpoint::DEFAULT_PORT),
            user: missing.take("ssh.user", self.user.as_ref()),
            auth,
            connect_timeout: self
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(SshEndpoint::DEFAULT_CONNECT_TIMEOUT),
        }
    }
}

impl RetryDto {
    pub fn to_config(&self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_delay: self
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: self
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            backoff_multiplier: self
                .backoff_multiplier
                .filter(|m| *m >= 1.0)
                .unwrap_or(defaults.backoff_multiplier),
        }
    }
}

impl TimeoutsDto {
    pub fn to_timeouts(&self) -> OperationTimeouts {
        fn limit(value: Option<u64>, default: Option<Duration>) -> Option<Duration> {
            match value {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => default,
            }
        }
        let defaults = OperationTimeouts::default();
        OperationTimeouts {
            query: limit(self.query_secs, defaults.query),
            dump: limit(self.dump_secs, defaults.dump),
            transfer: limit(self.transfer_secs, defaults.transfer),
            import: limit(self.import_secs, defaults.import),
        }
    }
}

impl ConfigurationDto {
    /// Builds the connection profile, reporting all missing fields together.
    pub fn to_profile(&self, key: &str, passphrase_override: Option<&str>) -> Result<ConnectionProfile> {
        let mut missing = MissingFields::default();

        let backup_dir = missing.take("backup_dir", self.backup_dir.as_ref());
        let source = match &self.export {
            Some(dto) => dto.to_endpoint("export", None, &mut missing),
            None => {
                missing.note("export");
                DatabaseDto::default().to_endpoint("export", Some(""), &mut MissingFields::default())
            }
        };
        let destination = match &self.import {
            Some(dto) => dto.to_endpoint("import", Some("localhost"), &mut missing),
            None => {
                missing.note("import");
                DatabaseDto::default().to_endpoint("import", Some(""), &mut MissingFields::default())
            }
        };
        let ssh = match &self.ssh {
            Some(dto) => dto.to_endpoint(passphrase_override, &mut missing),
            None => {
                missing.note("ssh");
                SshDto::default().to_endpoint(None, &mut MissingFields::default())
            }
        };

        if !missing.0.is_empty() {
            return Err(SyncError::config(format!(
                "Configuration '{}' is missing required fields: {}",
                key,
                missing.0.join(", ")
            )));
        }

        let profile = ConnectionProfile {
            name: self
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| key.to_string()),
            ssh,
            source,
            destination,
            backup_dir,
            staging_dir: self
                .staging_dir
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(std::env::temp_dir),
        };
        profile.validate()?;
        Ok(profile)
    }
}
