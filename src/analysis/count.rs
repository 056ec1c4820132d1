//! Record counting.

use serde_json::{Map, Value};

use super::keys::KeyTable;

/// Count the records in a parsed document.
///
/// Arrays count their elements. Objects first sum the arrays under
/// recognized container keys; failing that, the lengths of every array
/// reachable anywhere in the object. A non-empty document with no arrays
/// counts as one record. Empty objects and arrays count zero.
pub fn count_records(value: &Value, table: &KeyTable) -> u64 {
    match value {
        Value::Array(items) => items.len() as u64,
        Value::Object(obj) if obj.is_empty() => 0,
        Value::Object(obj) => {
            let in_containers = count_in_containers(obj, table);
            if in_containers > 0 {
                return in_containers;
            }
            match sum_array_lengths(value) {
                0 => 1,
                n => n,
            }
        }
        _ => 1,
    }
}

fn count_in_containers(obj: &Map<String, Value>, table: &KeyTable) -> u64 {
    table
        .containers()
        .filter_map(|key| obj.get(key))
        .map(|found| match found {
            Value::Array(items) => items.len() as u64,
            Value::Object(inner) => inner
                .values()
                .map(|v| v.as_array().map_or(0, |a| a.len() as u64))
                .sum(),
            _ => 0,
        })
        .sum()
}

/// A record count assembled while the extracted collection is walked in
/// chunks, after it has been moved out of its document.
///
/// Gives the same total as `count_records` on the intact document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkedCount {
    /// Total already decided by the document's top level.
    settled: Option<u64>,
    outside: u64,
    inside: u64,
}

impl ChunkedCount {
    /// Settle what the intact document decides on its own.
    pub fn start(document: &Value, table: &KeyTable) -> Self {
        let settled = match document {
            Value::Array(items) => Some(items.len() as u64),
            Value::Object(obj) if obj.is_empty() => Some(0),
            Value::Object(obj) => match count_in_containers(obj, table) {
                0 => None,
                n => Some(n),
            },
            _ => Some(1),
        };
        Self {
            settled,
            ..Self::default()
        }
    }

    /// Add the arrays left in the document once the collection is taken out.
    pub fn add_remainder(&mut self, remainder: &Value) {
        if self.settled.is_none() {
            self.outside += sum_array_lengths(remainder);
        }
    }

    /// Add one chunk of the collection. `in_array` is set when the
    /// collection is an array, whose own length counts too.
    pub fn add_chunk(&mut self, chunk: &[Value], in_array: bool) {
        if self.settled.is_some() {
            return;
        }
        if in_array {
            self.inside += chunk.len() as u64;
        }
        self.inside += chunk.iter().map(sum_array_lengths).sum::<u64>();
    }

    pub fn total(&self) -> u64 {
        self.settled.unwrap_or(match self.outside + self.inside {
            0 => 1,
            n => n,
        })
    }
}

/// Sum of the lengths of every array in `value`, nested ones included.
fn sum_array_lengths(value: &Value) -> u64 {
    match value {
        Value::Array(items) => {
            items.len() as u64 + items.iter().map(sum_array_lengths).sum::<u64>()
        }
        Value::Object(obj) => obj.values().map(sum_array_lengths).sum(),
        _ => 0,
    }
}
