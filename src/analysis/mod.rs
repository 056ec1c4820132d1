//! Shape heuristics for schema-less export documents.
//!
//! - `keys`: the versioned key table the heuristics read from
//! - `extract`: finding the primary record collection
//! - `count`: record counting
//! - `outline`: structure outlines and field type summaries

mod count;
mod extract;
mod keys;
mod outline;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

pub use count::{count_records, ChunkedCount};
pub use extract::{extract, Extracted, ExtractionStrategy};
pub use keys::{
    KeyRule, KeyTable, KeyTableError, KeyTier, BUILTIN_TABLE_VERSION, DEFAULT_SAMPLE_SIZE,
};
pub use outline::{build_structure_outline, infer_field_types, OutlineLimits, TRUNCATED_MARKER};

use crate::models::{FieldType, RecordMetadata};

/// Bundles a key table with outline limits so callers run every
/// heuristic against the same configuration.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    table: Arc<KeyTable>,
    limits: OutlineLimits,
}

impl Analyzer {
    pub fn new(table: KeyTable, limits: OutlineLimits) -> Self {
        Self {
            table: Arc::new(table),
            limits,
        }
    }

    pub fn table(&self) -> &KeyTable {
        &self.table
    }

    pub fn extract<'a>(&self, value: &'a Value) -> Extracted<'a> {
        extract(value, &self.table)
    }

    pub fn count_records(&self, value: &Value) -> u64 {
        count_records(value, &self.table)
    }

    /// Begin a count whose collection will be fed in chunks.
    pub fn start_count(&self, document: &Value) -> ChunkedCount {
        ChunkedCount::start(document, &self.table)
    }

    pub fn structure_outline(&self, value: &Value) -> Vec<String> {
        build_structure_outline(value, self.limits)
    }

    pub fn field_types(&self, value: &Value) -> BTreeMap<String, FieldType> {
        infer_field_types(value)
    }

    /// Metadata for a single document: counts from the original, field
    /// types from the extracted view.
    pub fn describe(&self, original: &Value, extracted: &Value) -> RecordMetadata {
        RecordMetadata {
            total_records: self.count_records(original),
            structure_outline: self.structure_outline(original),
            field_type_summary: self.field_types(extracted),
            skipped_entries: Vec::new(),
        }
    }
}
