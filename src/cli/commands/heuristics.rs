//! Key table inspection command.

use console::style;

use crate::config::Settings;

/// Print the effective key table as TOML.
pub async fn cmd_heuristics(settings: &Settings) -> anyhow::Result<()> {
    let table = settings.key_table()?;
    let source = settings
        .heuristics
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in".to_string());

    println!(
        "{} Key table version {} ({}), {} rules",
        style("→").cyan(),
        table.version,
        source,
        table.rules.len()
    );
    println!();
    print!("{}", table.to_toml()?);
    Ok(())
}
