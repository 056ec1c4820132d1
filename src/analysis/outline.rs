//! Structure outlines and field type summaries for display.

use std::collections::BTreeMap;

use serde_json::Value;

use super::extract::{join_index, join_key};
use crate::models::FieldType;

/// Bounds on outline size for very large or deep documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlineLimits {
    pub max_depth: usize,
    pub max_lines: usize,
}

impl Default for OutlineLimits {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_lines: 500,
        }
    }
}

/// Marker appended when the outline hits `max_lines`.
pub const TRUNCATED_MARKER: &str = "...";

/// Describe the document's keys and array lengths in traversal order.
///
/// Arrays are described by their length and their first element only.
pub fn build_structure_outline(value: &Value, limits: OutlineLimits) -> Vec<String> {
    let mut lines = Vec::new();
    let mut truncated = false;
    visit(value, "", 0, limits, &mut lines, &mut truncated);
    if truncated {
        lines.push(TRUNCATED_MARKER.to_string());
    }
    lines
}

fn visit(
    value: &Value,
    path: &str,
    depth: usize,
    limits: OutlineLimits,
    lines: &mut Vec<String>,
    truncated: &mut bool,
) {
    if lines.len() >= limits.max_lines {
        *truncated = true;
        return;
    }

    let label = if path.is_empty() { "$" } else { path };
    lines.push(format!("{}: {}", label, describe(value)));

    if depth >= limits.max_depth {
        return;
    }

    match value {
        Value::Object(obj) => {
            for (key, child) in obj {
                visit(child, &join_key(path, key), depth + 1, limits, lines, truncated);
                if *truncated {
                    return;
                }
            }
        }
        Value::Array(items) => {
            if let Some(first) = items.first() {
                visit(first, &join_index(path, 0), depth + 1, limits, lines, truncated);
            }
        }
        _ => {}
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Object(obj) => format!("object{{{}}}", obj.len()),
        other => FieldType::of(other).to_string(),
    }
}

/// Map each field of the sample record to a coarse type.
///
/// The sample is the first element of an array, or the value itself.
/// Nested objects are not descended into.
pub fn infer_field_types(value: &Value) -> BTreeMap<String, FieldType> {
    let sample = match value {
        Value::Array(items) => items.first(),
        other => Some(other),
    };

    match sample {
        Some(Value::Object(obj)) => obj
            .iter()
            .map(|(key, v)| (key.clone(), FieldType::of(v)))
            .collect(),
        _ => BTreeMap::new(),
    }
}
