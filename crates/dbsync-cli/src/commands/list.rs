use super::{CliContext, format_bytes};
use anyhow::Result;
use colored::Colorize;

pub async fn run(ctx: &CliContext) -> Result<()> {
    let config = ctx.resolve()?;
    let dir = config.profile.backup_dir.clone();
    let entries = ctx.service(config).list_existing_backups().await?;

    if ctx.json {
        return ctx.print_json(&entries);
    }

    if entries.is_empty() {
        println!("No backups in {}", dir);
        return Ok(());
    }
    println!("Backups in {}:", dir);
    for entry in &entries {
        let modified = entry
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<48} {:>10}  {}",
            entry.name.bold(),
            format_bytes(entry.size_bytes),
            modified.dimmed()
        );
    }
    Ok(())
}
