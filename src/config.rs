//! Configuration management for takeout-explorer using the prefer crate.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analysis::{Analyzer, KeyTable, KeyTableError, OutlineLimits};
use crate::models::PageId;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TAKEOUT_DATA_DIR";

/// Bulk payload database filename.
pub const PAYLOAD_DB_FILENAME: &str = "payloads.db";

/// Metadata mirror filename.
pub const METADATA_FILENAME: &str = "metadata.json";

/// Pages restored on startup when nothing else is configured.
pub const DEFAULT_KNOWN_PAGES: &[&str] = &["overview", "browser", "devices", "activity", "locations"];

const DEFAULT_READ_CHUNK_BYTES: usize = 1024 * 1024;
const DEFAULT_RECORD_CHUNK_SIZE: usize = 1000;
const DEFAULT_PROGRESS_BUFFER: usize = 64;
const DEFAULT_HISTORY_RETENTION: usize = 3;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Pages restored by `initialize_from_db`.
    pub known_pages: Vec<PageId>,
    /// Bytes read per step when loading an input file.
    pub read_chunk_bytes: usize,
    /// Records processed between progress events and cancellation checks.
    pub record_chunk_size: usize,
    /// Capacity of the progress channel.
    pub progress_buffer: usize,
    /// Bulk rows kept per page.
    pub history_retention: usize,
    /// Key table file overriding the built-in heuristics.
    pub heuristics: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back gracefully: local data dir -> Home dir -> Current dir
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("takeout-explorer");

        Self {
            data_dir,
            known_pages: DEFAULT_KNOWN_PAGES.iter().map(|p| PageId::from(*p)).collect(),
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            record_chunk_size: DEFAULT_RECORD_CHUNK_SIZE,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
            history_retention: DEFAULT_HISTORY_RETENTION,
            heuristics: None,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    pub fn payload_db_path(&self) -> PathBuf {
        self.data_dir.join(PAYLOAD_DB_FILENAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(METADATA_FILENAME)
    }

    /// Check if the data directory appears to be initialized.
    pub fn is_initialized(&self) -> bool {
        self.payload_db_path().exists()
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }

    /// The key table in effect: the configured heuristics file, or the
    /// built-in table.
    pub fn key_table(&self) -> Result<KeyTable, KeyTableError> {
        match self.heuristics {
            Some(ref path) => KeyTable::from_path(path),
            None => Ok(KeyTable::builtin()),
        }
    }

    pub fn analyzer(&self) -> Result<Analyzer, KeyTableError> {
        Ok(Analyzer::new(self.key_table()?, OutlineLimits::default()))
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "target")]
    pub data_dir: Option<String>,
    /// Pages restored on startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[prefer(default)]
    pub known_pages: Vec<String>,
    /// Bytes read per step when loading an input file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_chunk_bytes: Option<u64>,
    /// Records per progress step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_chunk_size: Option<u64>,
    /// Progress channel capacity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_buffer: Option<u64>,
    /// Bulk rows kept per page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_retention: Option<u64>,
    /// Key table file (TOML or JSON).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heuristics: Option<String>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers takeout config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("takeout").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring config {}: {}", path.display(), e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            // No config file found
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    /// Returns the config file's parent directory if available, otherwise None.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths (typically config file dir or CWD).
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if !self.known_pages.is_empty() {
            settings.known_pages = self.known_pages.iter().map(PageId::new).collect();
        }
        if let Some(bytes) = self.read_chunk_bytes {
            settings.read_chunk_bytes = (bytes as usize).max(1);
        }
        if let Some(size) = self.record_chunk_size {
            settings.record_chunk_size = (size as usize).max(1);
        }
        if let Some(buffer) = self.progress_buffer {
            settings.progress_buffer = (buffer as usize).max(1);
        }
        if let Some(retention) = self.history_retention {
            settings.history_retention = (retention as usize).max(1);
        }
        if let Some(ref heuristics) = self.heuristics {
            settings.heuristics = Some(self.resolve_path(heuristics, base_dir));
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Data directory (--target flag).
    pub target: Option<PathBuf>,
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    // Priority 1: Explicit --config flag, Priority 2: prefer discovery
    let config = match options.config_path {
        Some(ref config_path) => match Config::load_from_path(config_path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config {}: {}", config_path.display(), e);
                Config::default()
            }
        },
        None => Config::load().await,
    };

    let mut settings = Settings::default();

    let base_dir = if options.use_cwd {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    } else {
        config
            .base_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    };

    config.apply_to_settings(&mut settings, &base_dir);

    // TAKEOUT_DATA_DIR environment variable takes precedence over config
    if let Some(dir) = std::env::var(DATA_DIR_ENV).ok().filter(|s| !s.is_empty()) {
        tracing::debug!("Using {} from environment: {}", DATA_DIR_ENV, dir);
        settings.data_dir = absolute(Path::new(shellexpand::tilde(&dir).as_ref()));
    }

    // --target takes highest precedence
    if let Some(ref target) = options.target {
        settings.data_dir = absolute(target);
    }

    (settings, config)
}
