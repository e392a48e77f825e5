//! Process-backed implementations of the dbsync core traits, plus
//! configuration loading and local artifact staging.

pub mod config_service;
pub mod dto;
pub mod mysql_client;
pub mod openssh;
pub mod paths;
mod process;
pub mod space;
pub mod staging;

pub use config_service::{ConfigService, ResolvedConfig};
pub use mysql_client::MysqlClient;
pub use openssh::{OpenSshConfig, OpenSshConnector};
pub use paths::DbsyncPaths;
pub use staging::StagingArea;
