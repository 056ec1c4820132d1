//! Shared helper functions for CLI commands.

use std::sync::Arc;

use anyhow::Context;

use crate::config::Settings;
use crate::store::PageStore;

/// Truncate a string to max length with ellipsis.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Open the page store in the configured data directory.
pub fn open_store(settings: &Settings) -> anyhow::Result<Arc<PageStore>> {
    let store = PageStore::open(settings).with_context(|| {
        format!(
            "Failed to open data directory {}",
            settings.data_dir.display()
        )
    })?;
    Ok(Arc::new(store))
}
