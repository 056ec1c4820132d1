//! Import service.
//!
//! Turns an export file into a `NormalizedRecord` for a page. Decoding,
//! extraction and counting run on a blocking worker; the controlling task
//! waits for it, persists the result on success and sends the terminal
//! progress event. Separated from UI concerns - emits events for progress
//! tracking.

mod types;
mod worker;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::analysis::Analyzer;
use crate::models::{ImportStatus, JobState, NormalizedRecord, PageId, ProgressEvent};
use crate::store::PageStore;

pub use types::{ImportError, ImportOptions, ImportRequest, ImportSource, ParseError, SourceFormat};
use worker::{ImportJob, ProgressReporter};

/// Outcome of a finished import job.
pub type ImportResult = Result<Arc<NormalizedRecord>, ImportError>;

/// Service for importing export files into the page store.
pub struct Importer {
    store: Arc<PageStore>,
    analyzer: Analyzer,
    options: ImportOptions,
}

impl Importer {
    pub fn new(store: Arc<PageStore>, analyzer: Analyzer, options: ImportOptions) -> Self {
        Self {
            store,
            analyzer,
            options,
        }
    }

    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }

    /// Start an import job.
    ///
    /// The input format is decided here, before any I/O; an unsupported
    /// file type fails without starting a job. Otherwise returns a handle
    /// for cancellation and completion, plus the receiver for progress
    /// events. The last event is always `complete`, `error` or `cancelled`.
    ///
    /// The receiver never slows the job down. Intermediate events that find
    /// the channel full are dropped; `ImportHandle::progress` always has the
    /// latest one.
    pub fn start(
        &self,
        request: ImportRequest,
    ) -> Result<(ImportHandle, mpsc::Receiver<ProgressEvent>), ImportError> {
        let file_name = request.source.file_name();
        let format = SourceFormat::detect(&file_name, request.content_type.as_deref())?;

        // One slot beyond the buffer is held for the terminal event
        let (event_tx, event_rx) = mpsc::channel(self.options.progress_buffer.max(1) + 1);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(JobState::Idle);
        let (latest_tx, latest_rx) = watch::channel(None);
        let reporter = ProgressReporter::new(event_tx, state_tx, latest_tx, file_name.clone());

        let job = ImportJob {
            format,
            file_name: file_name.clone(),
            analyzer: self.analyzer.clone(),
            options: self.options,
            reporter: reporter.clone(),
            cancel: cancel_rx.clone(),
        };
        let source = request.source;
        let page_id = request.page_id.clone();
        let store = self.store.clone();

        tracing::info!("Importing {} into page {}", file_name, page_id);
        let task = tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || job.run(source)).await {
                Ok(result) => result,
                Err(e) => Err(ImportError::Worker(e.to_string())),
            };
            finish_job(result, &page_id, &store, &reporter, &cancel_rx).await
        });

        Ok((
            ImportHandle {
                file_name,
                page_id: request.page_id,
                cancel: ImportCanceller(Arc::new(cancel_tx)),
                state: state_rx,
                progress: latest_rx,
                task,
            },
            event_rx,
        ))
    }
}

/// Persist a successful result and send the terminal event.
async fn finish_job(
    result: Result<NormalizedRecord, ImportError>,
    page_id: &PageId,
    store: &PageStore,
    reporter: &ProgressReporter,
    cancel: &watch::Receiver<bool>,
) -> ImportResult {
    let outcome = match result {
        // Cancelled after the worker's last check: still nothing is stored
        Ok(_) if *cancel.borrow() => Err(ImportError::Cancelled),
        Ok(record) => store.put_record(page_id, record).await.map_err(ImportError::from),
        Err(e) => Err(e),
    };

    match &outcome {
        Ok(record) => {
            reporter.set_state(JobState::Complete);
            tracing::info!(
                "Imported {} into page {}: {} records",
                record.file_name,
                page_id,
                record.metadata.total_records
            );
            reporter.finish(ImportStatus::Complete, record.metadata.total_records, None);
        }
        Err(ImportError::Cancelled) => {
            reporter.set_state(JobState::Cancelled);
            tracing::info!("Import into page {} cancelled", page_id);
            reporter.finish(ImportStatus::Cancelled, 0, None);
        }
        Err(e) => {
            reporter.set_state(JobState::Error);
            tracing::error!("Import into page {} failed: {}", page_id, e);
            reporter.finish(ImportStatus::Error, 0, Some(e.to_string()));
        }
    }

    outcome
}

/// Requests cancellation of a running import. Cloneable so it can be handed
/// to a signal handler.
#[derive(Clone)]
pub struct ImportCanceller(Arc<watch::Sender<bool>>);

impl ImportCanceller {
    /// Ask the job to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Handle to a running import job.
pub struct ImportHandle {
    file_name: String,
    page_id: PageId,
    cancel: ImportCanceller,
    state: watch::Receiver<JobState>,
    progress: watch::Receiver<Option<ProgressEvent>>,
    task: JoinHandle<ImportResult>,
}

impl ImportHandle {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn canceller(&self) -> ImportCanceller {
        self.cancel.clone()
    }

    /// Current job state.
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Latest progress event, `None` before the first one. The receiver
    /// outlives the handle, so it can be kept after `wait`.
    pub fn progress(&self) -> watch::Receiver<Option<ProgressEvent>> {
        self.progress.clone()
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> ImportResult {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ImportError::Worker(e.to_string())),
        }
    }
}
