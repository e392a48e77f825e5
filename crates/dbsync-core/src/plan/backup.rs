//! Turns a [`BackupSpec`] into one remote dump script.
//!
//! The script writes every selected component into a single file, each
//! section opened by a marker line so a restore can pick components back
//! out. Table data always goes first.

use super::{PASSWORD_ENV, connection_args, queries, query_line};
use crate::artifact::{BackupArtifact, section_marker};
use crate::command::{CommandLine, RemoteCommand, shell_quote};
use crate::engine::EngineProfile;
use crate::error::Result;
use crate::profile::DatabaseEndpoint;
use crate::selection::{BackupSpec, Component, Compression};
use chrono::{DateTime, TimeZone};

pub const DUMP_PROGRAM: &str = "mysqldump";

const CONSISTENCY_OPTIONS: [&str; 6] = [
    "--single-transaction",
    "--quick",
    "--skip-lock-tables",
    "--default-character-set=utf8mb4",
    "--allow-keywords",
    "--quote-names",
];

const PRIVILEGED_OPTIONS: [&str; 2] = ["--max-allowed-packet=512M", "--net-buffer-length=32768"];

/// `{database}-export-YYYYmmdd-HHMMSS{ext}`
pub fn default_file_name<Tz>(database: &str, at: DateTime<Tz>, compression: Compression) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{database}-export-{}{}",
        at.format("%Y%m%d-%H%M%S"),
        compression.extension()
    )
}

/// One `mysqldump` invocation inside the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpPass {
    pub component: Component,
    /// Program and options, before the database argument.
    pub command: CommandLine,
    pub database: String,
}

impl DumpPass {
    fn render(&self) -> String {
        let mut out = self.command.render();
        // Views are dumped in their own pass, never as table data.
        if self.component == Component::TableData {
            out.push_str(" $ignore_views");
        }
        out.push(' ');
        out.push_str(&shell_quote(&self.database));
        if self.component == Component::Views {
            return format!("{{ if [ -n \"$views\" ]; then {out} $views; fi; }}");
        }
        out
    }
}

/// The planned dump: passes in section order plus the rendered script.
#[derive(Debug, Clone)]
pub struct DumpPlan {
    pub artifact: BackupArtifact,
    pub passes: Vec<DumpPass>,
    pub command: RemoteCommand,
}

impl DumpPlan {
    pub fn components(&self) -> Vec<Component> {
        self.passes.iter().map(|p| p.component).collect()
    }

    pub fn pass(&self, component: Component) -> Option<&DumpPass> {
        self.passes.iter().find(|p| p.component == component)
    }
}

pub struct BackupPlanner<'a> {
    endpoint: &'a DatabaseEndpoint,
    privileged: bool,
}

impl<'a> BackupPlanner<'a> {
    pub fn new(endpoint: &'a DatabaseEndpoint) -> Self {
        Self {
            endpoint,
            privileged: false,
        }
    }

    /// Adds the faster buffer options that need elevated grants.
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Plans a dump of `spec` written to `remote_path`.
    ///
    /// Fails with `Unsupported` when the source engine cannot dump a
    /// selected component.
    pub fn plan(
        &self,
        spec: &BackupSpec,
        engine: &EngineProfile,
        remote_path: &str,
    ) -> Result<DumpPlan> {
        spec.validate()?;
        let components = spec.components();
        engine.ensure_supports(components.iter().copied())?;

        let passes: Vec<DumpPass> = components
            .iter()
            .map(|c| self.pass(*c, spec, engine))
            .collect();
        let script = self.script(&passes, spec.compression(), remote_path);
        let command = RemoteCommand::new(script)
            .with_secret(PASSWORD_ENV, self.endpoint.password.clone());

        Ok(DumpPlan {
            artifact: BackupArtifact::planned(remote_path, spec.compression())
                .with_delete_after_transfer(spec.delete_after_transfer()),
            passes,
            command,
        })
    }

    fn base_options(&self, engine: &EngineProfile) -> Vec<String> {
        let caps = &engine.capabilities;
        let mut options = connection_args(self.endpoint);
        options.extend(CONSISTENCY_OPTIONS.iter().map(|o| o.to_string()));
        if caps.gtid_purged {
            options.push("--set-gtid-purged=OFF".to_string());
        }
        if caps.column_statistics {
            options.push("--column-statistics=0".to_string());
        }
        if caps.no_tablespaces {
            options.push("--no-tablespaces".to_string());
        }
        if self.privileged {
            options.extend(PRIVILEGED_OPTIONS.iter().map(|o| o.to_string()));
        }
        options
    }

    fn pass(&self, component: Component, spec: &BackupSpec, engine: &EngineProfile) -> DumpPass {
        let database = &self.endpoint.database;
        let extra: Vec<String> = match component {
            Component::TableData => std::iter::once("--skip-triggers".to_string())
                .chain(
                    spec.excluded_tables()
                        .iter()
                        .map(|t| format!("--ignore-table={database}.{t}")),
                )
                .collect(),
            Component::Routines => ["--routines", "--no-data", "--no-create-info", "--skip-triggers"]
                .map(String::from)
                .to_vec(),
            Component::Triggers => ["--triggers", "--no-data", "--no-create-info"]
                .map(String::from)
                .to_vec(),
            Component::Views => ["--no-data", "--skip-triggers"].map(String::from).to_vec(),
            Component::Events => ["--events", "--no-data", "--no-create-info", "--skip-triggers"]
                .map(String::from)
                .to_vec(),
        };
        DumpPass {
            component,
            command: CommandLine::new(DUMP_PROGRAM)
                .args(self.base_options(engine))
                .args(extra),
            database: database.clone(),
        }
    }

    fn script(&self, passes: &[DumpPass], compression: Compression, remote_path: &str) -> String {
        let target = shell_quote(remote_path);
        // `$$` keeps the temporary files of concurrent attempts apart.
        let part = format!("{}$$", shell_quote(&format!("{remote_path}.part.")));
        let raw = format!("{}$$", shell_quote(&format!("{remote_path}.raw.")));
        let dir = remote_path
            .rsplit_once('/')
            .map(|(dir, _)| if dir.is_empty() { "/" } else { dir })
            .unwrap_or(".");

        let views_query = query_line(self.endpoint, &queries::views(&self.endpoint.database));
        let ignore_prefix = shell_quote(&format!("--ignore-table={}.%s ", self.endpoint.database));

        let sections = passes
            .iter()
            .map(|p| {
                format!(
                    "printf '%s\\n' {} && {}",
                    shell_quote(&section_marker(p.component)),
                    p.render()
                )
            })
            .collect::<Vec<_>>()
            .join(" && ");

        let finish = match compression {
            Compression::Gzip => format!(
                "{{ {sections}; }} > {raw} && gzip -c {raw} > {part} && rm -f {raw}"
            ),
            Compression::Plain => format!("{{ {sections}; }} > {part}"),
        };

        format!(
            "mkdir -p {dir} && views=$({views_query}) && \
             ignore_views=$(for v in $views; do printf -- {ignore_prefix} \"$v\"; done) && \
             {finish} && size=$(wc -c < {part}) && mv -f {part} {target} && echo \"$size\" \
             || {{ rc=$?; rm -f {part} {raw}; exit $rc; }}",
            dir = shell_quote(dir),
            views_query = views_query.render(),
        )
    }
}
