//! Normalized import records handed to downstream consumers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::sanitize_filename;

/// How an import's payload is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    /// Payload maps archive entry name to that entry's parsed JSON.
    ArchiveImport,
    /// Payload is the extracted record collection (or the whole document).
    SingleDocumentImport,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArchiveImport => "archive",
            Self::SingleDocumentImport => "document",
        }
    }
}

/// Record payload, or a marker that it lives in the bulk store.
///
/// Records rehydrated from the metadata mirror carry `Elsewhere` until the
/// bulk row has been loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Loaded(Value),
    Elsewhere,
}

impl Payload {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Payload::Loaded(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Payload::Loaded(value) => Some(value),
            Payload::Elsewhere => None,
        }
    }
}

/// Coarse type tag for a field of a sample record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "len", rename_all = "snake_case")]
pub enum FieldType {
    Null,
    Array(usize),
    Object,
    String,
    Number,
    Boolean,
}

impl FieldType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => FieldType::Null,
            Value::Array(items) => FieldType::Array(items.len()),
            Value::Object(_) => FieldType::Object,
            Value::String(_) => FieldType::String,
            Value::Number(_) => FieldType::Number,
            Value::Bool(_) => FieldType::Boolean,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Null => write!(f, "null"),
            FieldType::Array(len) => write!(f, "array[{}]", len),
            FieldType::Object => write!(f, "object"),
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
        }
    }
}

/// An archive entry that was left out of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

/// Structural summary computed at import time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub total_records: u64,
    pub structure_outline: Vec<String>,
    pub field_type_summary: BTreeMap<String, FieldType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_entries: Vec<SkippedEntry>,
}

/// The unit of exchange between the import pipeline and its consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: String,
    pub kind: ImportKind,
    pub file_name: String,
    pub byte_size: u64,
    pub ingested_at: DateTime<Utc>,
    pub payload: Payload,
    pub metadata: RecordMetadata,
}

impl NormalizedRecord {
    /// Build a record stamped with a fresh id for this ingestion.
    pub fn new(
        kind: ImportKind,
        file_name: impl Into<String>,
        byte_size: u64,
        payload: Value,
        metadata: RecordMetadata,
    ) -> Self {
        let file_name = file_name.into();
        let ingested_at = Utc::now();
        Self {
            id: record_id(&file_name, ingested_at),
            kind,
            file_name,
            byte_size,
            ingested_at,
            payload: Payload::Loaded(payload),
            metadata,
        }
    }

    /// Copy of this record with the payload replaced by the `Elsewhere` marker.
    pub fn without_payload(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind,
            file_name: self.file_name.clone(),
            byte_size: self.byte_size,
            ingested_at: self.ingested_at,
            payload: Payload::Elsewhere,
            metadata: self.metadata.clone(),
        }
    }

    pub fn is_payload_loaded(&self) -> bool {
        self.payload.is_loaded()
    }
}

/// Derive an id from the file name and ingestion time.
///
/// A random suffix keeps ids unique when the same file is imported twice
/// within one millisecond.
fn record_id(file_name: &str, ingested_at: DateTime<Utc>) -> String {
    let stem = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .split('.')
        .next()
        .unwrap_or(file_name);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        sanitize_filename(stem).replace(' ', "_"),
        ingested_at.timestamp_millis(),
        &suffix[..8]
    )
}
