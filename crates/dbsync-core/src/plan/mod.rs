//! Command planning for dumps, queries and imports.
//!
//! Planners are pure: they turn profiles and selections into commands and
//! never touch the network.

pub mod backup;
pub mod restore;

use crate::command::{ClientCommand, CommandLine, RemoteCommand};
use crate::profile::DatabaseEndpoint;

/// Environment variable both MySQL clients read the password from.
pub const PASSWORD_ENV: &str = "MYSQL_PWD";

/// The interactive client, used for queries and imports.
pub const CLIENT_PROGRAM: &str = "mysql";

/// Connection flags shared by `mysql` and `mysqldump`.
pub(crate) fn connection_args(endpoint: &DatabaseEndpoint) -> Vec<String> {
    vec![
        format!("--host={}", endpoint.host),
        format!("--port={}", endpoint.port),
        format!("--user={}", endpoint.user),
    ]
}

pub(crate) fn query_line(endpoint: &DatabaseEndpoint, sql: &str) -> CommandLine {
    CommandLine::new(CLIENT_PROGRAM)
        .args(connection_args(endpoint))
        .args(["--batch", "--skip-column-names", "--execute"])
        .arg(sql)
        .arg(endpoint.database.clone())
}

/// A single statement run by the client on the source host.
pub fn remote_query(endpoint: &DatabaseEndpoint, sql: &str) -> RemoteCommand {
    RemoteCommand::from_line(&query_line(endpoint, sql))
        .with_secret(PASSWORD_ENV, endpoint.password.clone())
}

/// A single statement run by the client on this machine.
pub fn local_query(endpoint: &DatabaseEndpoint, sql: &str) -> ClientCommand {
    ClientCommand::new(query_line(endpoint, sql))
        .with_secret(PASSWORD_ENV, endpoint.password.clone())
}

/// Escapes a value for use inside a single-quoted SQL literal.
pub(crate) fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Statements used by capability detection and dump planning.
pub mod queries {
    use super::sql_literal;

    pub const VERSION: &str = "SELECT VERSION()";

    pub const VARIABLES: &str = "SHOW VARIABLES WHERE Variable_name IN \
        ('character_set_server', 'collation_server', 'max_allowed_packet', 'wait_timeout')";

    pub const GRANTS: &str = "SHOW GRANTS";

    /// Data plus index bytes of one schema.
    pub fn database_size(database: &str) -> String {
        format!(
            "SELECT COALESCE(SUM(data_length + index_length), 0) \
             FROM information_schema.TABLES WHERE table_schema = {}",
            sql_literal(database)
        )
    }

    pub fn views(database: &str) -> String {
        format!(
            "SELECT TABLE_NAME FROM information_schema.VIEWS WHERE TABLE_SCHEMA = {}",
            sql_literal(database)
        )
    }
}
