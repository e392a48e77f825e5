//! Server version parsing and capability profiles.

use crate::error::{DetectionError, Result, SyncError};
use crate::selection::Component;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Dialect family a server belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTag {
    #[strum(serialize = "MySQL 5.7")]
    Mysql57,
    #[strum(serialize = "MySQL 8.0")]
    Mysql80,
    #[strum(serialize = "unknown engine")]
    Unknown,
}

/// Known profiles, ascending. A version maps to the highest entry not above it.
const KNOWN_PROFILES: [((u64, u64), CapabilityTag); 2] = [
    ((5, 7), CapabilityTag::Mysql57),
    ((8, 0), CapabilityTag::Mysql80),
];

/// Feature flags the planners consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub routines: bool,
    pub triggers: bool,
    pub views: bool,
    pub events: bool,
    /// Accepts `--set-gtid-purged`.
    pub gtid_purged: bool,
    /// Accepts `--column-statistics`.
    pub column_statistics: bool,
    /// Accepts `--no-tablespaces`.
    pub no_tablespaces: bool,
}

impl CapabilityTag {
    pub fn capabilities(self) -> Capabilities {
        match self {
            CapabilityTag::Mysql80 => Capabilities {
                routines: true,
                triggers: true,
                views: true,
                events: true,
                gtid_purged: true,
                column_statistics: true,
                no_tablespaces: true,
            },
            CapabilityTag::Mysql57 => Capabilities {
                routines: true,
                triggers: true,
                views: true,
                events: true,
                gtid_purged: true,
                column_statistics: false,
                no_tablespaces: true,
            },
            // Least common denominator.
            CapabilityTag::Unknown => Capabilities {
                routines: true,
                triggers: true,
                views: true,
                events: false,
                gtid_purged: false,
                column_statistics: false,
                no_tablespaces: false,
            },
        }
    }

    /// Floor-match a MySQL version onto the known profiles.
    pub fn for_version(version: &Version) -> Self {
        KNOWN_PROFILES
            .iter()
            .rev()
            .find(|((major, minor), _)| (version.major, version.minor) >= (*major, *minor))
            .map(|(_, tag)| *tag)
            .unwrap_or(CapabilityTag::Unknown)
    }
}

impl Capabilities {
    pub fn supports(&self, component: Component) -> bool {
        match component {
            Component::TableData => true,
            Component::Routines => self.routines,
            Component::Triggers => self.triggers,
            Component::Views => self.views,
            Component::Events => self.events,
        }
    }
}

/// Detected engine: parsed version, its tag and the derived capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineProfile {
    pub version: Version,
    /// Version string exactly as the server reported it.
    pub raw: String,
    pub tag: CapabilityTag,
    pub capabilities: Capabilities,
}

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*(\d+)\.(\d+)(?:\.(\d+))?").ok())
        .as_ref()
}

impl EngineProfile {
    /// Parses a raw `VERSION()` string such as `8.0.35-0ubuntu0.22.04.1`.
    ///
    /// MariaDB reports MySQL-like numbers with different semantics, so it is
    /// always mapped to [`CapabilityTag::Unknown`].
    pub fn from_version_string(raw: &str) -> std::result::Result<Self, DetectionError> {
        let trimmed = raw.trim();
        let captures = version_pattern()
            .and_then(|re| re.captures(trimmed))
            .ok_or_else(|| DetectionError::Unparseable {
                raw: trimmed.to_string(),
            })?;
        let number = |idx: usize| -> std::result::Result<u64, DetectionError> {
            captures
                .get(idx)
                .map(|m| m.as_str().parse::<u64>())
                .transpose()
                .map(|v| v.unwrap_or(0))
                .map_err(|_| DetectionError::Unparseable {
                    raw: trimmed.to_string(),
                })
        };
        let version = Version::new(number(1)?, number(2)?, number(3)?);
        let tag = if trimmed.to_ascii_lowercase().contains("mariadb") {
            CapabilityTag::Unknown
        } else {
            CapabilityTag::for_version(&version)
        };
        Ok(Self {
            version,
            raw: trimmed.to_string(),
            tag,
            capabilities: tag.capabilities(),
        })
    }

    /// Parses client output, using the last non-empty line.
    pub fn from_version_output(output: &str) -> std::result::Result<Self, DetectionError> {
        let line = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or_default();
        Self::from_version_string(line)
    }

    /// Profile used when detection is skipped.
    pub fn conservative() -> Self {
        Self {
            version: Version::new(0, 0, 0),
            raw: String::new(),
            tag: CapabilityTag::Unknown,
            capabilities: CapabilityTag::Unknown.capabilities(),
        }
    }

    pub fn supports(&self, component: Component) -> bool {
        self.capabilities.supports(component)
    }

    /// Fails with `Unsupported` on the first component in restore order
    /// the engine cannot handle.
    pub fn ensure_supports<I>(&self, components: I) -> Result<()>
    where
        I: IntoIterator<Item = Component>,
    {
        for component in components {
            if !self.supports(component) {
                return Err(SyncError::Unsupported {
                    component,
                    engine: self.describe(),
                });
            }
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        if self.raw.is_empty() {
            self.tag.to_string()
        } else {
            format!("{} ({})", self.tag, self.raw)
        }
    }
}

/// Server variables shown alongside the version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVariables {
    pub character_set_server: Option<String>,
    pub collation_server: Option<String>,
    pub max_allowed_packet: Option<u64>,
    pub wait_timeout: Option<u64>,
}

impl ServerVariables {
    /// Parses tab-separated `SHOW VARIABLES` output. Header and unknown rows are skipped.
    pub fn parse(output: &str) -> Self {
        let mut vars = Self::default();
        for line in output.lines() {
            let Some((name, value)) = line.split_once('\t') else {
                continue;
            };
            let value = value.trim();
            match name.trim() {
                "character_set_server" => vars.character_set_server = Some(value.to_string()),
                "collation_server" => vars.collation_server = Some(value.to_string()),
                "max_allowed_packet" => vars.max_allowed_packet = value.parse().ok(),
                "wait_timeout" => vars.wait_timeout = value.parse().ok(),
                _ => {}
            }
        }
        vars
    }
}

/// Grants that unlock the faster dump and import options.
const PRIVILEGED_GRANTS: [&str; 4] = [
    "SUPER",
    "SYSTEM_VARIABLES_ADMIN",
    "SESSION_VARIABLES_ADMIN",
    "ALL PRIVILEGES",
];

pub fn grants_are_privileged(grants: &str) -> bool {
    let upper = grants.to_ascii_uppercase();
    PRIVILEGED_GRANTS.iter().any(|g| upper.contains(g))
        || upper.contains("GRANT ALL ON *.*")
}

/// What server detection reports about one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub engine: EngineProfile,
    pub variables: ServerVariables,
    pub privileged: bool,
    pub database_size_bytes: Option<u64>,
}
