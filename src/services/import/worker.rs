//! The blocking side of an import job.
//!
//! Runs on a `spawn_blocking` thread. Everything it learns flows back to the
//! controlling task as `ProgressEvent`s; the only thing it reads from the
//! controller is the cancellation flag, checked between chunks and entries.

use std::fs::File;
use std::io::Read;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use super::types::{ImportError, ImportOptions, ImportSource, ParseError, SourceFormat};
use crate::analysis::{Analyzer, ChunkedCount};
use crate::archive::{ArchiveDecoder, DecodedEntry, EntryOutcome};
use crate::models::{
    ImportKind, ImportStatus, JobState, NormalizedRecord, ProgressEvent, RecordMetadata,
    SkippedEntry,
};
use crate::utils::has_extension;

/// Percent reached once the input is fully read.
const READ_END: f64 = 30.0;
/// Percent reached once the input is decoded or parsed.
const PARSE_END: f64 = 40.0;
/// Percent reached once every record chunk or entry is processed.
const PROCESS_END: f64 = 95.0;

#[derive(Debug, Clone, Copy, Default)]
struct Snapshot {
    percent: f64,
    records: u64,
    total_size: u64,
}

/// Sends progress events for one job, keeping percent non-decreasing.
///
/// Progress never holds the job back: intermediate events are dropped when
/// the channel is full, and the latest one is always available through the
/// `latest` watch. The last channel slot is kept free for the terminal
/// event, which is therefore always delivered.
#[derive(Clone)]
pub(super) struct ProgressReporter {
    tx: mpsc::Sender<ProgressEvent>,
    state: Arc<watch::Sender<JobState>>,
    latest: Arc<watch::Sender<Option<ProgressEvent>>>,
    file_name: String,
    snapshot: Arc<Mutex<Snapshot>>,
}

impl ProgressReporter {
    pub(super) fn new(
        tx: mpsc::Sender<ProgressEvent>,
        state: watch::Sender<JobState>,
        latest: watch::Sender<Option<ProgressEvent>>,
        file_name: String,
    ) -> Self {
        Self {
            tx,
            state: Arc::new(state),
            latest: Arc::new(latest),
            file_name,
            snapshot: Arc::new(Mutex::new(Snapshot::default())),
        }
    }

    pub(super) fn set_state(&self, state: JobState) {
        tracing::debug!("{}: {}", self.file_name, state.as_str());
        self.state.send_replace(state);
    }

    fn set_total_size(&self, total_size: u64) {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner()).total_size = total_size;
    }

    fn advance(&self, percent: f64, records: u64) -> Snapshot {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        snapshot.percent = percent.clamp(0.0, 100.0).max(snapshot.percent);
        snapshot.records = records.max(snapshot.records);
        *snapshot
    }

    fn event(&self, snapshot: Snapshot, status: ImportStatus, error: Option<String>) -> ProgressEvent {
        ProgressEvent {
            file_name: self.file_name.clone(),
            progress: snapshot.percent,
            status,
            records_processed: snapshot.records,
            total_size: snapshot.total_size,
            error,
        }
    }

    /// Report progress from the worker thread. Never blocks.
    fn report(&self, percent: f64, records: u64) {
        let snapshot = self.advance(percent, records);
        let event = self.event(snapshot, ImportStatus::Parsing, None);
        self.latest.send_replace(Some(event.clone()));

        // Only the worker sends while the job runs, so free capacity can
        // only grow between this check and the send.
        if self.tx.capacity() > 1 {
            let _ = self.tx.try_send(event);
        }
    }

    /// Send the terminal event. Nothing is sent after this.
    pub(super) fn finish(&self, status: ImportStatus, records: u64, error: Option<String>) {
        let percent = if status == ImportStatus::Complete { 100.0 } else { 0.0 };
        let snapshot = self.advance(percent, records);
        let event = self.event(snapshot, status, error);
        self.latest.send_replace(Some(event.clone()));

        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("{}: no room for the final progress event", self.file_name);
            }
        }
    }
}

/// Everything the worker needs, moved onto the blocking thread.
pub(super) struct ImportJob {
    pub(super) format: SourceFormat,
    pub(super) file_name: String,
    pub(super) analyzer: Analyzer,
    pub(super) options: ImportOptions,
    pub(super) reporter: ProgressReporter,
    pub(super) cancel: watch::Receiver<bool>,
}

impl ImportJob {
    pub(super) fn run(self, source: ImportSource) -> Result<NormalizedRecord, ImportError> {
        let data = self.read_source(source)?;
        match self.format {
            SourceFormat::Json => self.import_document(data),
            SourceFormat::Archive => self.import_archive(data),
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn check_cancel(&self) -> Result<(), ImportError> {
        if self.is_cancelled() {
            tracing::debug!("{}: cancellation observed", self.file_name);
            Err(ImportError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn read_source(&self, source: ImportSource) -> Result<Vec<u8>, ImportError> {
        self.reporter.set_state(JobState::Reading);
        self.check_cancel()?;

        match source {
            ImportSource::Bytes { data, .. } => {
                self.reporter.set_total_size(data.len() as u64);
                self.reporter.report(READ_END, 0);
                Ok(data)
            }
            ImportSource::Path(path) => {
                let mut file = File::open(&path)?;
                let total = file.metadata()?.len();
                self.reporter.set_total_size(total);

                let mut data = Vec::with_capacity(total as usize);
                let mut buf = vec![0u8; self.options.read_chunk_bytes];
                loop {
                    self.check_cancel()?;
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    data.extend_from_slice(&buf[..n]);
                    let fraction = if total == 0 {
                        1.0
                    } else {
                        (data.len() as f64 / total as f64).min(1.0)
                    };
                    self.reporter.report(READ_END * fraction, 0);
                }
                Ok(data)
            }
        }
    }

    fn import_document(&self, data: Vec<u8>) -> Result<NormalizedRecord, ImportError> {
        if data.is_empty() {
            return Err(ParseError::EmptyInput.into());
        }
        let byte_size = data.len() as u64;

        let mut document: Value = serde_json::from_slice(&data).map_err(ParseError::from)?;
        drop(data);
        self.reporter.report(PARSE_END, 0);
        self.check_cancel()?;

        self.reporter.set_state(JobState::Extracting);
        let extracted = self.analyzer.extract(&document);
        if extracted.is_ambiguous() {
            tracing::debug!(
                "{}: no record collection found, treating the document as one record",
                self.file_name
            );
        } else {
            tracing::debug!(
                "{}: records found via {:?} at '{}'",
                self.file_name,
                extracted.strategy,
                extracted.strategy.path()
            );
        }
        let pointer = extracted.pointer(&document);
        let field_type_summary = self.analyzer.field_types(extracted.records);
        let mut count = self.analyzer.start_count(&document);
        self.check_cancel()?;

        let structure_outline = self.analyzer.structure_outline(&document);
        self.check_cancel()?;

        // Move the collection out instead of copying it; what is left of the
        // document is only needed for counting.
        let records = if pointer.is_empty() {
            std::mem::take(&mut document)
        } else {
            document
                .pointer_mut(&pointer)
                .map(Value::take)
                .ok_or_else(|| ImportError::Worker(format!("lost extracted records at {}", pointer)))?
        };
        count.add_remainder(&document);
        drop(document);

        self.reporter.set_state(JobState::Counting);
        self.walk_records(&records, &mut count)?;

        let metadata = RecordMetadata {
            total_records: count.total(),
            structure_outline,
            field_type_summary,
            skipped_entries: Vec::new(),
        };
        Ok(NormalizedRecord::new(
            ImportKind::SingleDocumentImport,
            self.file_name.clone(),
            byte_size,
            records,
            metadata,
        ))
    }

    /// Count the extracted records chunk by chunk, reporting progress and
    /// honoring cancellation between chunks.
    fn walk_records(&self, records: &Value, count: &mut ChunkedCount) -> Result<(), ImportError> {
        let (items, in_array) = match records {
            Value::Array(items) => (items.as_slice(), true),
            other => (std::slice::from_ref(other), false),
        };
        if items.is_empty() {
            self.check_cancel()?;
            self.reporter.report(PROCESS_END, 0);
            return Ok(());
        }

        let mut processed = 0u64;
        for chunk in items.chunks(self.options.record_chunk_size) {
            self.check_cancel()?;
            count.add_chunk(chunk, in_array);
            processed += chunk.len() as u64;
            let fraction = processed as f64 / items.len() as f64;
            self.reporter
                .report(PARSE_END + (PROCESS_END - PARSE_END) * fraction, processed);
        }
        self.check_cancel()
    }

    fn import_archive(&self, data: Vec<u8>) -> Result<NormalizedRecord, ImportError> {
        let byte_size = data.len() as u64;
        self.reporter.set_state(JobState::Decoding);

        let mut payload = Map::new();
        let mut metadata = RecordMetadata::default();
        let mut cancelled = false;

        let summary = ArchiveDecoder::decode_each(data, |at, outcome| {
            if self.is_cancelled() {
                cancelled = true;
                return ControlFlow::Break(());
            }
            if at.index == 0 {
                self.reporter.report(PARSE_END, 0);
                self.reporter.set_state(JobState::Extracting);
            }

            match outcome {
                EntryOutcome::Decoded(entry) => self.absorb_entry(entry, &mut payload, &mut metadata),
                EntryOutcome::Failed(failed) => metadata.skipped_entries.push(SkippedEntry {
                    name: failed.name,
                    reason: failed.error,
                }),
            }

            let fraction = (at.index + 1) as f64 / at.total.max(1) as f64;
            self.reporter.report(
                PARSE_END + (PROCESS_END - PARSE_END) * fraction,
                metadata.total_records,
            );
            ControlFlow::Continue(())
        })?;

        if cancelled {
            tracing::debug!("{}: cancellation observed", self.file_name);
            return Err(ImportError::Cancelled);
        }

        self.reporter.set_state(JobState::Counting);
        if payload.is_empty() {
            tracing::warn!(
                "{}: no usable JSON entries among {} archive entries",
                self.file_name,
                summary.total
            );
        }
        tracing::debug!(
            "{}: {} entries imported, {} skipped",
            self.file_name,
            payload.len(),
            metadata.skipped_entries.len()
        );
        self.reporter.report(PROCESS_END, metadata.total_records);

        Ok(NormalizedRecord::new(
            ImportKind::ArchiveImport,
            self.file_name.clone(),
            byte_size,
            Value::Object(payload),
            metadata,
        ))
    }

    /// Parse, extract and count one archive entry, folding it into the
    /// aggregate. Entries that are not usable JSON are skipped.
    fn absorb_entry(
        &self,
        entry: DecodedEntry,
        payload: &mut Map<String, Value>,
        metadata: &mut RecordMetadata,
    ) {
        if !has_extension(&entry.name, "json") {
            tracing::warn!("Skipping non-JSON archive entry {}", entry.name);
            metadata.skipped_entries.push(SkippedEntry {
                name: entry.name,
                reason: "not a JSON file".to_string(),
            });
            return;
        }

        let value: Value = match serde_json::from_slice(&entry.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Skipping archive entry {}: invalid JSON: {}", entry.name, e);
                metadata.skipped_entries.push(SkippedEntry {
                    name: entry.name,
                    reason: format!("invalid JSON: {}", e),
                });
                return;
            }
        };

        let extracted = self.analyzer.extract(&value);
        let described = self.analyzer.describe(&value, extracted.records);
        metadata.total_records += described.total_records;
        for (field, field_type) in described.field_type_summary {
            metadata.field_type_summary.entry(field).or_insert(field_type);
        }
        metadata.structure_outline.extend(
            described
                .structure_outline
                .into_iter()
                .map(|line| format!("[{}] {}", entry.name, line)),
        );

        payload.insert(entry.name, value);
    }
}
