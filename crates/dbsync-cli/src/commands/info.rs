use super::{CliContext, format_bytes};
use anyhow::Result;
use colored::Colorize;

pub async fn run(ctx: &CliContext) -> Result<()> {
    let config = ctx.resolve()?;
    let host = config.profile.ssh.host.clone();
    let database = config.profile.source.database.clone();
    let info = ctx.service(config).detect_server_info().await?;

    if ctx.json {
        return ctx.print_json(&info);
    }

    let vars = &info.variables;
    let unknown = || "unknown".to_string();
    println!("{} {} on {}", "Server:".bold(), database, host);
    println!("  Engine:        {}", info.engine.describe());
    println!(
        "  Charset:       {}",
        vars.character_set_server.clone().unwrap_or_else(unknown)
    );
    println!(
        "  Collation:     {}",
        vars.collation_server.clone().unwrap_or_else(unknown)
    );
    println!(
        "  Max packet:    {}",
        vars.max_allowed_packet.map(format_bytes).unwrap_or_else(unknown)
    );
    println!(
        "  Wait timeout:  {}",
        vars.wait_timeout
            .map(|s| format!("{s}s"))
            .unwrap_or_else(unknown)
    );
    println!(
        "  Database size: {}",
        info.database_size_bytes.map(format_bytes).unwrap_or_else(unknown)
    );
    println!(
        "  Privileged:    {}",
        if info.privileged { "yes".green() } else { "no".yellow() }
    );
    Ok(())
}
