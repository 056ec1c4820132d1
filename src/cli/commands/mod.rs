//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod heuristics;
mod import;
mod init;
mod pages;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "takeout")]
#[command(about = "Import and explore personal data export archives")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file and TAKEOUT_DATA_DIR).
    #[arg(long, short = 't', global = true)]
    target: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and payload database
    Init,

    /// Import an export file (.json or .zip) into a page
    Import {
        /// File to import
        file: PathBuf,
        /// Page to store the import under
        #[arg(short, long)]
        page: String,
    },

    /// Show what each page holds (metadata only, payloads are not loaded)
    Status,

    /// Load a page's payload and describe it
    Show {
        /// Page to show
        page: String,
        /// Print the structure outline
        #[arg(long)]
        outline: bool,
        /// Number of sample records to print
        #[arg(short, long, default_value = "0")]
        sample: usize,
    },

    /// Clear stored data for a page, or everything
    Clear {
        /// Page to clear
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        page: Option<String>,
        /// Clear every page and both stores
        #[arg(long)]
        all: bool,
    },

    /// Print the effective key table used to recognize export layouts
    Heuristics,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        target: cli.target,
    };
    let (settings, _config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Import { file, page } => import::cmd_import(&settings, &file, &page).await,
        Commands::Status => pages::cmd_status(&settings).await,
        Commands::Show {
            page,
            outline,
            sample,
        } => pages::cmd_show(&settings, &page, outline, sample).await,
        Commands::Clear { page, all } => pages::cmd_clear(&settings, page.as_deref(), all).await,
        Commands::Heuristics => heuristics::cmd_heuristics(&settings).await,
    }
}
