//! Connection settings for the source host, its database and the local destination.

use crate::error::{Result, SyncError};
use crate::selection::validate_identifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A credential that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// How the SSH client authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SshAuth {
    /// Private key file, optionally protected by a passphrase.
    Key {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<Secret>,
        /// Password offered when the server rejects the key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password_fallback: Option<Secret>,
    },
    Password { password: Secret },
}

/// The SSH side of the source host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: SshAuth,
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl SshEndpoint {
    pub const DEFAULT_PORT: u16 = 22;
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// `user@host` as passed to ssh/scp.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SyncError::validation("ssh.host", "SSH host is required"));
        }
        if self.user.trim().is_empty() {
            return Err(SyncError::validation("ssh.user", "SSH user is required"));
        }
        if self.host.starts_with('-') || self.user.starts_with('-') {
            return Err(SyncError::validation(
                "ssh.host",
                "host and user must not start with '-'",
            ));
        }
        Ok(())
    }
}

/// A MySQL server as seen from the machine that runs the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub database: String,
}

impl DatabaseEndpoint {
    pub const DEFAULT_PORT: u16 = 3306;

    pub fn validate(&self, prefix: &str) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SyncError::validation(
                format!("{prefix}.host"),
                "database host is required",
            ));
        }
        if self.user.trim().is_empty() {
            return Err(SyncError::validation(
                format!("{prefix}.user"),
                "database user is required",
            ));
        }
        validate_identifier(&format!("{prefix}.database"), &self.database)
    }
}

/// Everything needed to reach the source and the local destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Display name of the configuration.
    pub name: String,
    pub ssh: SshEndpoint,
    /// Source database, addressed from the SSH host.
    pub source: DatabaseEndpoint,
    /// Destination database, addressed from this machine.
    pub destination: DatabaseEndpoint,
    /// Directory on the SSH host that holds dump artifacts.
    pub backup_dir: String,
    /// Local directory used for downloads and staging.
    pub staging_dir: PathBuf,
}

impl ConnectionProfile {
    pub fn validate(&self) -> Result<()> {
        self.ssh.validate()?;
        self.source.validate("export")?;
        self.destination.validate("import")?;
        if self.backup_dir.trim().is_empty() {
            return Err(SyncError::validation(
                "backup_dir",
                "remote backup directory is required",
            ));
        }
        Ok(())
    }

    /// Full remote path of an artifact in the backup directory.
    pub fn remote_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.backup_dir.trim_end_matches('/'), file_name)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
