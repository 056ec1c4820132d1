//! Locating the primary record collection inside an arbitrary document.
//!
//! Strategies are tried in order and the first match wins:
//!
//! 1. the document is itself an array
//! 2. a recognized container key holds an array
//! 3. a recognized container key holds an object with a non-empty array
//! 4. a generic collection key holds a non-empty array, at the top level or
//!    one level down
//! 5. depth-first search for the first array that looks like event data
//!    (URL or timestamp fields) or has more than ten elements
//! 6. the whole document, treated as a single record
//!
//! Step 5 deliberately prefers the first qualifying array over the largest:
//! big arrays of configuration should not win over event data.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::keys::KeyTable;

/// Arrays longer than this qualify in the deep search without hints.
const DEEP_SEARCH_MIN_LEN: usize = 10;

/// Which strategy produced the extracted collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ExtractionStrategy {
    RootArray,
    ContainerKey { key: String },
    NestedContainer { key: String, child: String },
    CollectionKey { path: String },
    DeepSearch { path: String },
    /// No qualifying array; the document counts as one record.
    WholeDocument,
}

impl ExtractionStrategy {
    /// JSON path of the extracted collection ("" for the root).
    pub fn path(&self) -> String {
        match self {
            Self::RootArray | Self::WholeDocument => String::new(),
            Self::ContainerKey { key } => key.clone(),
            Self::NestedContainer { key, child } => join_key(key, child),
            Self::CollectionKey { path } | Self::DeepSearch { path } => path.clone(),
        }
    }
}

/// The extracted collection, borrowed from the source document.
#[derive(Debug, Clone)]
pub struct Extracted<'a> {
    pub records: &'a Value,
    pub strategy: ExtractionStrategy,
}

impl Extracted<'_> {
    /// Whether the extractor fell back to the whole document.
    pub fn is_ambiguous(&self) -> bool {
        self.strategy == ExtractionStrategy::WholeDocument
    }

    /// JSON pointer (RFC 6901) of the collection within `root`, the document
    /// it was extracted from. Empty when the collection is the root itself.
    pub fn pointer(&self, root: &Value) -> String {
        let mut pointer = String::new();
        if !locate(root, self.records, &mut pointer) {
            pointer.clear();
        }
        pointer
    }
}

/// Build the pointer to `target` by identity, in traversal order.
fn locate(node: &Value, target: &Value, pointer: &mut String) -> bool {
    if std::ptr::eq(node, target) {
        return true;
    }
    let len = pointer.len();
    match node {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                pointer.push('/');
                pointer.push_str(&i.to_string());
                if locate(item, target, pointer) {
                    return true;
                }
                pointer.truncate(len);
            }
        }
        Value::Object(obj) => {
            for (key, child) in obj {
                pointer.push('/');
                pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
                if locate(child, target, pointer) {
                    return true;
                }
                pointer.truncate(len);
            }
        }
        _ => {}
    }
    false
}

/// Find the primary record collection in `value`.
pub fn extract<'a>(value: &'a Value, table: &KeyTable) -> Extracted<'a> {
    let obj = match value {
        Value::Array(_) => {
            return Extracted {
                records: value,
                strategy: ExtractionStrategy::RootArray,
            }
        }
        Value::Object(obj) => obj,
        _ => return whole_document(value),
    };

    if let Some(found) = find_in_containers(obj, table) {
        return found;
    }
    if let Some(found) = find_in_collections(obj, table) {
        return found;
    }
    if let Some((records, path)) = deep_search(value, String::new(), table) {
        return Extracted {
            records,
            strategy: ExtractionStrategy::DeepSearch { path },
        };
    }

    tracing::debug!("No qualifying record array found, using whole document");
    whole_document(value)
}

fn whole_document(value: &Value) -> Extracted<'_> {
    Extracted {
        records: value,
        strategy: ExtractionStrategy::WholeDocument,
    }
}

/// Steps 2 and 3: recognized container keys, in table order.
fn find_in_containers<'a>(obj: &'a Map<String, Value>, table: &KeyTable) -> Option<Extracted<'a>> {
    for key in table.containers() {
        match obj.get(key) {
            Some(found @ Value::Array(_)) => {
                return Some(Extracted {
                    records: found,
                    strategy: ExtractionStrategy::ContainerKey {
                        key: key.to_string(),
                    },
                });
            }
            Some(Value::Object(inner)) => {
                if let Some((child, records)) = first_non_empty_array(inner) {
                    return Some(Extracted {
                        records,
                        strategy: ExtractionStrategy::NestedContainer {
                            key: key.to_string(),
                            child: child.to_string(),
                        },
                    });
                }
            }
            _ => {}
        }
    }
    None
}

/// Step 4: generic collection keys at the top level, then one level down.
fn find_in_collections<'a>(
    obj: &'a Map<String, Value>,
    table: &KeyTable,
) -> Option<Extracted<'a>> {
    if let Some((key, records)) = collection_array(obj, table) {
        return Some(Extracted {
            records,
            strategy: ExtractionStrategy::CollectionKey {
                path: key.to_string(),
            },
        });
    }

    for (parent, child) in obj {
        if let Value::Object(inner) = child {
            if let Some((key, records)) = collection_array(inner, table) {
                return Some(Extracted {
                    records,
                    strategy: ExtractionStrategy::CollectionKey {
                        path: join_key(parent, key),
                    },
                });
            }
        }
    }
    None
}

fn collection_array<'a, 't>(
    obj: &'a Map<String, Value>,
    table: &'t KeyTable,
) -> Option<(&'t str, &'a Value)> {
    table.collections().find_map(|key| match obj.get(key) {
        Some(found @ Value::Array(items)) if !items.is_empty() => Some((key, found)),
        _ => None,
    })
}

fn first_non_empty_array(obj: &Map<String, Value>) -> Option<(&str, &Value)> {
    obj.iter().find_map(|(key, value)| match value {
        Value::Array(items) if !items.is_empty() => Some((key.as_str(), value)),
        _ => None,
    })
}

/// Step 5: pre-order search for the first qualifying array.
fn deep_search<'a>(value: &'a Value, path: String, table: &KeyTable) -> Option<(&'a Value, String)> {
    match value {
        Value::Array(items) => {
            if qualifies(items, table) {
                return Some((value, path));
            }
            items
                .iter()
                .enumerate()
                .find_map(|(i, item)| deep_search(item, join_index(&path, i), table))
        }
        Value::Object(obj) => obj
            .iter()
            .find_map(|(key, child)| deep_search(child, join_key(&path, key), table)),
        _ => None,
    }
}

fn qualifies(items: &[Value], table: &KeyTable) -> bool {
    if items.is_empty() {
        return false;
    }
    items.len() > DEEP_SEARCH_MIN_LEN
        || items
            .iter()
            .take(table.sample_size.max(1))
            .any(|item| looks_like_event(item, table))
}

/// An element that carries a URL-like or timestamp-like field.
pub(crate) fn looks_like_event(item: &Value, table: &KeyTable) -> bool {
    match item {
        Value::Object(obj) => obj.iter().any(|(key, value)| {
            table.is_url_field(key)
                || table.is_timestamp_field(key)
                || is_url_value(value)
                || is_timestamp_value(value)
        }),
        other => is_url_value(other) || is_timestamp_value(other),
    }
}

fn is_url_value(value: &Value) -> bool {
    let Value::String(s) = value else {
        return false;
    };
    let lower = s.get(..8).unwrap_or(s).to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")) && url::Url::parse(s).is_ok()
}

fn timestamp_re() -> &'static Regex {
    static TIMESTAMP_RE: OnceLock<Regex> = OnceLock::new();
    TIMESTAMP_RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?$")
            .expect("valid timestamp regex")
    })
}

fn is_timestamp_value(value: &Value) -> bool {
    matches!(value, Value::String(s) if timestamp_re().is_match(s))
}

pub(crate) fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

pub(crate) fn join_index(path: &str, index: usize) -> String {
    format!("{}[{}]", path, index)
}
