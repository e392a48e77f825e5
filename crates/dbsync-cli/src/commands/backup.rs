use super::{CliContext, format_bytes, timeout_override};
use anyhow::Result;
use clap::{Args, ValueEnum};
use colored::Colorize;
use dbsync_application::{BackupOutcome, RestoreOutcome};
use dbsync_core::selection::{BackupSpec, Component, Compression, RestoreSpec};
use serde::Serialize;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CompressionArg {
    Gzip,
    None,
}

impl From<CompressionArg> for Compression {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::Gzip => Compression::Gzip,
            CompressionArg::None => Compression::Plain,
        }
    }
}

#[derive(Serialize)]
struct BackupAndRestore<'a> {
    backup: &'a BackupOutcome,
    restore: &'a RestoreOutcome,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Dump table data only
    #[arg(long, conflicts_with_all = ["routines", "triggers", "views", "events"])]
    tables_only: bool,
    /// Include stored procedures and functions
    #[arg(long)]
    routines: bool,
    /// Include triggers
    #[arg(long)]
    triggers: bool,
    /// Include views
    #[arg(long)]
    views: bool,
    /// Include scheduled events
    #[arg(long)]
    events: bool,

    #[arg(long, value_enum, default_value_t = CompressionArg::Gzip)]
    compression: CompressionArg,

    /// Skip the data of a table (repeatable)
    #[arg(long = "exclude-table", value_name = "TABLE")]
    exclude_tables: Vec<String>,

    /// Artifact file name instead of <database>-export-<timestamp>
    #[arg(long, value_name = "NAME")]
    file_name: Option<String>,

    /// Restore the new dump into the destination right away
    #[arg(long)]
    restore: bool,

    /// Remove the remote dump once it has been downloaded
    #[arg(long, requires = "restore")]
    delete_remote: bool,

    /// Dump timeout in seconds, 0 for none
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

impl BackupArgs {
    fn spec(&self) -> BackupSpec {
        let explicit = self.routines || self.triggers || self.views || self.events;
        let base = if self.tables_only || explicit {
            BackupSpec::tables_only()
                .with_component(Component::Routines, self.routines)
                .with_component(Component::Triggers, self.triggers)
                .with_component(Component::Views, self.views)
                .with_component(Component::Events, self.events)
        } else {
            BackupSpec::default()
        };
        let spec = base
            .with_compression(self.compression.into())
            .with_excluded_tables(self.exclude_tables.iter().cloned())
            .with_delete_after_transfer(self.delete_remote);
        match &self.file_name {
            Some(name) => spec.with_file_name(name.clone()),
            None => spec,
        }
    }
}

pub async fn run(ctx: &CliContext, args: BackupArgs) -> Result<()> {
    let mut config = ctx.resolve()?;
    if let Some(secs) = args.timeout {
        config.timeouts.dump = timeout_override(secs);
    }
    let service = ctx.service(config);

    let backup = service.create_backup(&args.spec()).await?;
    if !args.restore {
        if ctx.json {
            return ctx.print_json(&backup);
        }
        println!(
            "{} Created {} ({}) in {:.1}s",
            "✓".green(),
            backup.artifact.remote_path(),
            format_bytes(backup.artifact.size().unwrap_or(0)),
            backup.elapsed.as_secs_f64()
        );
        return Ok(());
    }

    let spec = RestoreSpec::from_components(backup.components.iter().copied());
    let restored = service.restore_backup(backup.artifact.clone(), &spec).await?;
    if ctx.json {
        return ctx.print_json(&BackupAndRestore {
            backup: &backup,
            restore: &restored,
        });
    }
    super::restore::print_outcome(&restored, &service.profile().destination.database);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: BackupArgs,
    }

    fn parse(argv: &[&str]) -> BackupArgs {
        let mut full = vec!["backup"];
        full.extend_from_slice(argv);
        Wrapper::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_no_flags_uses_default_selection() {
        let spec = parse(&[]).spec();
        assert_eq!(spec, BackupSpec::default());
        assert!(!spec.includes(Component::Events));
    }

    #[test]
    fn test_explicit_flags_select_only_those() {
        let spec = parse(&["--routines", "--views", "--compression", "none"]).spec();
        assert_eq!(
            spec.components(),
            vec![Component::TableData, Component::Routines, Component::Views]
        );
        assert_eq!(spec.compression(), Compression::Plain);
    }

    #[test]
    fn test_delete_remote_requires_restore() {
        let full = ["backup", "--delete-remote"];
        assert!(Wrapper::try_parse_from(full).is_err());
        let args = parse(&["--restore", "--delete-remote"]);
        assert!(args.spec().delete_after_transfer());
    }
}
