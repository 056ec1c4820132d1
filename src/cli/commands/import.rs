//! Import command.

use std::path::Path;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Settings;
use crate::models::{ImportStatus, PageId};
use crate::services::{ImportError, ImportOptions, ImportRequest, Importer};
use crate::utils::{format_percent, format_size};

use crate::cli::helpers::{open_store, truncate};

/// Import a file into a page, showing progress. Ctrl-C cancels.
pub async fn cmd_import(settings: &Settings, file: &Path, page: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let importer = Importer::new(
        store,
        settings.analyzer()?,
        ImportOptions::from(settings),
    );

    let page_id = PageId::new(page);
    let (handle, mut events) = match importer.start(ImportRequest::from_path(page_id.clone(), file))
    {
        Ok(started) => started,
        Err(e) => {
            println!("{} {}", style("✗").red(), e);
            return Err(e.into());
        }
    };

    println!(
        "{} Importing {} into page {}",
        style("→").cyan(),
        handle.file_name(),
        style(&page_id).bold()
    );

    let canceller = handle.canceller();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}% {wide_msg}")?
            .progress_chars("█▓░"),
    );

    while let Some(event) = events.recv().await {
        pb.set_position(event.progress.round() as u64);
        match event.status {
            ImportStatus::Parsing => pb.set_message(format!(
                "{} records, {} of {}",
                event.records_processed,
                format_percent(event.progress),
                format_size(event.total_size)
            )),
            ImportStatus::Complete | ImportStatus::Error | ImportStatus::Cancelled => {
                pb.finish_and_clear()
            }
        }
    }
    signal.abort();

    match handle.wait().await {
        Ok(record) => {
            println!(
                "{} Imported {} ({}): {} records",
                style("✓").green(),
                truncate(&record.file_name, 40),
                format_size(record.byte_size),
                record.metadata.total_records
            );
            for skipped in &record.metadata.skipped_entries {
                println!(
                    "  {} Skipped {}: {}",
                    style("!").yellow(),
                    skipped.name,
                    skipped.reason
                );
            }
            Ok(())
        }
        Err(ImportError::Cancelled) => {
            println!(
                "{} Import cancelled, page {} unchanged",
                style("!").yellow(),
                page_id
            );
            Ok(())
        }
        Err(e) => {
            println!("{} Import failed: {}", style("✗").red(), e);
            Err(e.into())
        }
    }
}
