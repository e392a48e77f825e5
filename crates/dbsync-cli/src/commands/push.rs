use super::{CliContext, format_bytes};
use anyhow::Result;
use colored::Colorize;
use std::path::Path;

pub async fn run(ctx: &CliContext, file: &Path) -> Result<()> {
    let config = ctx.resolve()?;
    let outcome = ctx.service(config).push_backup(file).await?;

    if ctx.json {
        return ctx.print_json(&outcome);
    }

    if outcome.uploaded {
        println!(
            "{} Uploaded {} to {}",
            "✓".green(),
            format_bytes(outcome.size_bytes),
            outcome.remote_path
        );
    } else {
        println!(
            "{} {} already present, skipped",
            "✓".green(),
            outcome.remote_path
        );
    }
    Ok(())
}
