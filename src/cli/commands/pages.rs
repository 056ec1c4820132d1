//! Page inspection and clearing commands.

use console::style;
use serde_json::Value;

use crate::analysis::Analyzer;
use crate::cli::helpers::{open_store, truncate};
use crate::config::Settings;
use crate::models::{ImportKind, NormalizedRecord, PageId};
use crate::utils::format_size;

/// List pages from the metadata mirror without loading payloads.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    if !settings.is_initialized() {
        println!(
            "{} No data in {}. Run 'takeout init' first.",
            style("!").yellow(),
            settings.data_dir.display()
        );
        return Ok(());
    }

    let store = open_store(settings)?;

    println!("\n{}", style("Pages").bold());
    println!("{}", "-".repeat(86));
    println!(
        "{:<12} {:<28} {:<9} {:>9} {:>10} {}",
        "Page", "File", "Kind", "Records", "Size", "Imported"
    );
    println!("{}", "-".repeat(86));

    for (page, record) in store.pages() {
        match record {
            Some(record) => println!(
                "{:<12} {:<28} {:<9} {:>9} {:>10} {}",
                page.as_str(),
                truncate(&record.file_name, 27),
                record.kind.as_str(),
                record.metadata.total_records,
                format_size(record.byte_size),
                record.ingested_at.format("%Y-%m-%d %H:%M")
            ),
            None => println!("{:<12} {}", page.as_str(), style("empty").dim()),
        }
    }

    Ok(())
}

/// Load a page's payload and print its metadata, outline and samples.
pub async fn cmd_show(
    settings: &Settings,
    page: &str,
    outline: bool,
    sample: usize,
) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let page_id = PageId::new(page);

    let record = match store.load_page_data_from_db(&page_id).await {
        Some(record) => record,
        None => {
            if store.get_page_data(&page_id).is_some() {
                println!(
                    "{} Page {} has metadata but its payload could not be loaded",
                    style("✗").red(),
                    page_id
                );
            } else {
                println!("{} Page {} is empty", style("!").yellow(), page_id);
            }
            return Ok(());
        }
    };

    print_summary(&page_id, &record);

    if outline {
        println!("\n{}", style("Structure").bold());
        for line in &record.metadata.structure_outline {
            println!("  {}", line);
        }
    }

    if sample > 0 {
        if let Some(payload) = record.payload.as_value() {
            print_samples(&settings.analyzer()?, record.kind, payload, sample)?;
        }
    }

    Ok(())
}

fn print_summary(page_id: &PageId, record: &NormalizedRecord) {
    println!("\n{} {}", style("Page").bold(), style(page_id).cyan());
    println!("{}", "-".repeat(60));
    println!("  {:<14} {}", "File:", record.file_name);
    println!("  {:<14} {}", "Kind:", record.kind.as_str());
    println!("  {:<14} {}", "Size:", format_size(record.byte_size));
    println!("  {:<14} {}", "Records:", record.metadata.total_records);
    println!(
        "  {:<14} {}",
        "Imported:",
        record.ingested_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  {:<14} {}", "Id:", record.id);

    if !record.metadata.field_type_summary.is_empty() {
        println!("\n{}", style("Fields").bold());
        for (field, field_type) in &record.metadata.field_type_summary {
            println!("  {:<30} {}", truncate(field, 30), field_type);
        }
    }

    if !record.metadata.skipped_entries.is_empty() {
        println!("\n{}", style("Skipped entries").bold());
        for skipped in &record.metadata.skipped_entries {
            println!("  {} {}: {}", style("!").yellow(), skipped.name, skipped.reason);
        }
    }
}

fn print_samples(
    analyzer: &Analyzer,
    kind: ImportKind,
    payload: &Value,
    sample: usize,
) -> anyhow::Result<()> {
    match (kind, payload) {
        (ImportKind::ArchiveImport, Value::Object(entries)) => {
            for (name, value) in entries {
                println!("\n{} {}", style("Sample from").bold(), name);
                print_records(analyzer.extract(value).records, sample)?;
            }
        }
        _ => {
            println!("\n{}", style("Sample").bold());
            print_records(payload, sample)?;
        }
    }
    Ok(())
}

fn print_records(records: &Value, sample: usize) -> anyhow::Result<()> {
    let items = match records {
        Value::Array(items) => items.as_slice(),
        other => std::slice::from_ref(other),
    };
    for item in items.iter().take(sample) {
        println!("{}", serde_json::to_string_pretty(item)?);
    }
    if items.len() > sample {
        println!("  {} more", style(items.len() - sample).dim());
    }
    Ok(())
}

/// Clear one page or everything.
pub async fn cmd_clear(settings: &Settings, page: Option<&str>, all: bool) -> anyhow::Result<()> {
    let store = open_store(settings)?;

    if all {
        store.clear_all_data().await?;
        println!("{} Cleared all pages", style("✓").green());
        return Ok(());
    }

    if let Some(page) = page {
        let page_id = PageId::new(page);
        store.clear_page_data(&page_id).await?;
        println!("{} Cleared page {}", style("✓").green(), page_id);
    }

    Ok(())
}
