//! Data models for the ingestion pipeline.

mod page;
mod progress;
mod record;

pub use page::{format_timestamp, PageId, StoredEntry};
pub use progress::{ImportStatus, JobState, ProgressEvent};
pub use record::{FieldType, ImportKind, NormalizedRecord, Payload, RecordMetadata, SkippedEntry};
