//! Path resolution for the dbsync configuration file.
//!
//! ```text
//! ~/.config/dbsync/
//! └── config.toml     # named configurations
//! ```

use dbsync_core::{Result, SyncError};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the configuration file location.
pub const CONFIG_ENV: &str = "DBSYNC_CONFIG";

pub struct DbsyncPaths;

impl DbsyncPaths {
    /// The dbsync configuration directory (e.g. `~/.config/dbsync/`).
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("dbsync"))
            .ok_or_else(|| SyncError::config("Cannot find the user configuration directory"))
    }

    /// Resolves the configuration file: explicit path, then `DBSYNC_CONFIG`,
    /// then the default location.
    pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(expand_tilde(path));
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Ok(expand_tilde(Path::new(&path)));
        }
        Ok(Self::config_dir()?.join("config.toml"))
    }
}

/// Replaces a leading `~` with the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            expand_tilde(Path::new("~/.ssh/id_ed25519")),
            home.join(".ssh/id_ed25519")
        );
        assert_eq!(expand_tilde(Path::new("~")), home);
        assert_eq!(
            expand_tilde(Path::new("/etc/ssh/key")),
            PathBuf::from("/etc/ssh/key")
        );
        assert_eq!(
            expand_tilde(Path::new("~other/key")),
            PathBuf::from("~other/key")
        );
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let path = DbsyncPaths::config_file(Some(Path::new("/srv/dbsync.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("/srv/dbsync.toml"));
    }
}
