//! Versioned key table driving the shape heuristics.
//!
//! Export producers name their top-level collections inconsistently, so the
//! extractor and counter consult an ordered table of key names instead of
//! hard-coded literals. Order within a tier is priority order.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the built-in table. Bump when rules change meaning.
pub const BUILTIN_TABLE_VERSION: u32 = 1;

/// Default number of array elements inspected for URL/timestamp hints.
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

const CONTAINER_KEYS: &[&str] = &[
    "Browser History",
    "BrowserHistory",
    "browser_history",
    "Device Info",
    "DeviceInfo",
    "device_info",
    "Location History",
    "Semantic Location History",
    "Search History",
    "Watch History",
    "My Activity",
    "Chrome",
];

const COLLECTION_KEYS: &[&str] = &[
    "items",
    "data",
    "records",
    "entries",
    "results",
    "events",
    "history",
    "activities",
    "activity",
    "messages",
    "logs",
    "timelineObjects",
    "locations",
    "visits",
    "sessions",
    "devices",
    "list",
    "rows",
    "values",
];

const URL_HINTS: &[&str] = &["url", "uri", "href", "link", "website"];

const TIMESTAMP_HINTS: &[&str] = &[
    "timestamp", "time", "date", "datetime", "usec", "created", "updated", "modified", "when",
];

#[derive(Debug, Error)]
pub enum KeyTableError {
    #[error("Failed to read key table: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML key table: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse JSON key table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Key table has no container or collection rules")]
    NoCollectionRules,
}

/// Role a key name plays in the heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyTier {
    /// Recognized export-format container (e.g. "Browser History").
    Container,
    /// Generic collection-like key name (e.g. "items").
    Collection,
    /// Field-name token suggesting a URL.
    UrlHint,
    /// Field-name token suggesting a timestamp.
    TimestampHint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRule {
    pub key: String,
    pub tier: KeyTier,
}

impl KeyRule {
    fn new(key: &str, tier: KeyTier) -> Self {
        Self {
            key: key.to_string(),
            tier,
        }
    }
}

/// Ordered key-name table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTable {
    pub version: u32,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    pub rules: Vec<KeyRule>,
}

fn default_sample_size() -> usize {
    DEFAULT_SAMPLE_SIZE
}

impl Default for KeyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl KeyTable {
    /// The built-in table.
    pub fn builtin() -> Self {
        let tiers = [
            (CONTAINER_KEYS, KeyTier::Container),
            (COLLECTION_KEYS, KeyTier::Collection),
            (URL_HINTS, KeyTier::UrlHint),
            (TIMESTAMP_HINTS, KeyTier::TimestampHint),
        ];
        let rules = tiers
            .iter()
            .flat_map(|(keys, tier)| keys.iter().map(move |k| KeyRule::new(k, *tier)))
            .collect();
        Self {
            version: BUILTIN_TABLE_VERSION,
            sample_size: DEFAULT_SAMPLE_SIZE,
            rules,
        }
    }

    /// Load a table from a TOML or JSON file (chosen by extension).
    pub fn from_path(path: &Path) -> Result<Self, KeyTableError> {
        let contents = std::fs::read_to_string(path)?;
        let table: KeyTable = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&contents)?,
            _ => serde_json::from_str(&contents)?,
        };
        if table.containers().next().is_none() && table.collections().next().is_none() {
            return Err(KeyTableError::NoCollectionRules);
        }
        Ok(table)
    }

    /// Render the table as TOML for inspection.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn keys_in(&self, tier: KeyTier) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(move |r| r.tier == tier)
            .map(|r| r.key.as_str())
    }

    /// Recognized container keys in priority order.
    pub fn containers(&self) -> impl Iterator<Item = &str> {
        self.keys_in(KeyTier::Container)
    }

    /// Generic collection keys in priority order.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.keys_in(KeyTier::Collection)
    }

    pub fn is_url_field(&self, field: &str) -> bool {
        self.matches_hint(field, KeyTier::UrlHint)
    }

    pub fn is_timestamp_field(&self, field: &str) -> bool {
        self.matches_hint(field, KeyTier::TimestampHint)
    }

    /// A field matches a hint when one of its name tokens equals the hint.
    fn matches_hint(&self, field: &str, tier: KeyTier) -> bool {
        let tokens = field_tokens(field);
        self.keys_in(tier)
            .any(|hint| tokens.iter().any(|t| t.eq_ignore_ascii_case(hint)))
    }
}

/// Split a field name on separators and camelCase boundaries.
fn field_tokens(field: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in field.chars() {
        if c == '_' || c == '-' || c == ' ' || c == '.' {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
