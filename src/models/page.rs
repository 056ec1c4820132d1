//! Page identifiers and the persisted wrapper around a record.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::NormalizedRecord;

/// Logical page (dashboard view) a record is loaded into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A record as written to the bulk store.
///
/// Several entries may exist for one page; the one with the latest
/// `updated_at` is current. The record is shared with the page store's
/// in-memory copy.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub storage_key: String,
    pub page_id: PageId,
    pub record: Arc<NormalizedRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredEntry {
    pub fn new(page_id: PageId, record: impl Into<Arc<NormalizedRecord>>) -> Self {
        let record = record.into();
        let now = Utc::now();
        Self {
            storage_key: Self::storage_key(&page_id, &record.id),
            page_id,
            record,
            created_at: now,
            updated_at: now,
        }
    }

    /// Composite key of page and record id.
    pub fn storage_key(page_id: &PageId, record_id: &str) -> String {
        format!("{}:{}", page_id, record_id)
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
