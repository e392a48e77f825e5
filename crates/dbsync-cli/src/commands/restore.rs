use super::{CliContext, RestoreComponents, timeout_override};
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use dbsync_application::{CleanupReport, RestoreOutcome};
use dbsync_core::artifact::BackupArtifact;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Remote dump path, or a file name inside the backup directory
    artifact: String,

    #[command(flatten)]
    components: RestoreComponents,

    /// Remove the remote dump once it has been downloaded
    #[arg(long)]
    delete_remote: bool,

    /// Import timeout in seconds per component, 0 for none
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

pub async fn run(ctx: &CliContext, args: RestoreArgs) -> Result<()> {
    let mut config = ctx.resolve()?;
    if let Some(secs) = args.timeout {
        config.timeouts.import = timeout_override(secs);
    }
    let remote_path = if args.artifact.starts_with('/') {
        args.artifact.clone()
    } else if args.artifact.contains('/') {
        bail!("'{}' must be an absolute path or a bare file name", args.artifact);
    } else {
        config.profile.remote_path(&args.artifact)
    };
    let artifact = BackupArtifact::existing(remote_path)?.with_delete_after_transfer(args.delete_remote);

    let service = ctx.service(config);
    let outcome = service
        .restore_backup(artifact, &args.components.to_spec())
        .await?;

    if ctx.json {
        return ctx.print_json(&outcome);
    }
    print_outcome(&outcome, &service.profile().destination.database);
    Ok(())
}

pub fn print_outcome(outcome: &RestoreOutcome, database: &str) {
    let restored: Vec<&str> = outcome.restored.iter().map(|c| c.as_str()).collect();
    println!(
        "{} Restored {} into {} [{}] in {:.1}s",
        "✓".green(),
        outcome.artifact.file_name(),
        database,
        restored.join(", "),
        outcome.elapsed.as_secs_f64()
    );
    match &outcome.cleanup {
        CleanupReport::NotRequested => {}
        CleanupReport::Removed => println!("  Removed {}", outcome.artifact.remote_path()),
        CleanupReport::Failed { error } => {
            println!("  {} {}", "warning:".yellow().bold(), error)
        }
    }
}
