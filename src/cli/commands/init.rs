//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::repository::SqlitePayloadStore;

/// Initialize the data directory and payload database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    SqlitePayloadStore::new(&settings.payload_db_path(), settings.history_retention)?;

    if let Some(ref heuristics) = settings.heuristics {
        // Fail early on a broken key table rather than at first import
        settings.key_table()?;
        println!(
            "  {} Using key table {}",
            style("✓").green(),
            heuristics.display()
        );
    }

    println!(
        "{} Initialized takeout-explorer in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    Ok(())
}
