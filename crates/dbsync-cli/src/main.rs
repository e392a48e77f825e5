use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use dbsync_execution::SyncEventLayer;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

mod commands;

use commands::CliContext;

#[derive(Parser)]
#[command(name = "dbsync", version)]
#[command(about = "dbsync - Remote MySQL backup and restore over SSH", long_about = None)]
struct Cli {
    /// Configuration file (default: $DBSYNC_CONFIG or ~/.config/dbsync/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Configuration to use; optional when the file defines only one
    #[arg(short = 'c', long = "config-name", global = true, value_name = "NAME")]
    name: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configurations in the configuration file
    Configs,
    /// Show version and settings of the source server
    Info,
    /// Dump the source database on the remote host
    Backup(commands::backup::BackupArgs),
    /// List dumps in the remote backup directory
    List,
    /// Download a dump and import it into the destination
    Restore(commands::restore::RestoreArgs),
    /// Upload a local dump into the remote backup directory
    Push {
        /// Local .sql or .sql.gz file
        file: PathBuf,
    },
}

/// Formatter on stderr filtered by `RUST_LOG`, plus a progress printer fed
/// by the phase events of the running operation.
fn init_tracing() {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .with(SyncEventLayer::new(tx).with_filter(LevelFilter::INFO))
        .init();

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(phase) = event.phase() {
                eprintln!("{} {}", format!("{phase:>9}").cyan().bold(), event.message);
            }
        }
    });
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling...".yellow());
            cancel.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let ctx = CliContext {
        config: cli.config,
        name: cli.name,
        json: cli.json,
        cancel: cancel_on_ctrl_c(),
    };

    match cli.command {
        Commands::Configs => commands::configs::run(&ctx)?,
        Commands::Info => commands::info::run(&ctx).await?,
        Commands::Backup(args) => commands::backup::run(&ctx, args).await?,
        Commands::List => commands::list::run(&ctx).await?,
        Commands::Restore(args) => commands::restore::run(&ctx, args).await?,
        Commands::Push { file } => commands::push::run(&ctx, &file).await?,
    }

    Ok(())
}
