use super::CliContext;
use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
struct ConfigEntry {
    key: String,
    name: String,
    default: bool,
}

pub fn run(ctx: &CliContext) -> Result<()> {
    let configs = ctx.load()?;
    let default_key = configs.default_key().ok();
    let entries: Vec<ConfigEntry> = configs
        .names()
        .into_iter()
        .map(|(key, name)| ConfigEntry {
            default: default_key.as_deref() == Some(key.as_str()),
            key,
            name,
        })
        .collect();

    if ctx.json {
        return ctx.print_json(&entries);
    }

    println!("Configurations in {}:", configs.path().display());
    if entries.is_empty() {
        println!("  (none)");
    }
    for entry in &entries {
        let marker = if entry.default { " (default)".dimmed().to_string() } else { String::new() };
        if entry.key == entry.name {
            println!("  {}{}", entry.key.bold(), marker);
        } else {
            println!("  {}  {}{}", entry.key.bold(), entry.name, marker);
        }
    }
    Ok(())
}
