//! Page store: the in-memory source of truth for what each page shows.
//!
//! Backed by two physical stores. The metadata mirror is read synchronously
//! when the store opens, so record details are available immediately; the
//! full payload stays in the bulk store until `load_page_data_from_db`
//! fetches it. Until then a page's record carries `Payload::Elsewhere`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::Settings;
use crate::models::{NormalizedRecord, PageId, StoredEntry};
use crate::repository::{MetadataMirror, PayloadBackend, Result, SqlitePayloadStore};

type PageMap = BTreeMap<PageId, Option<Arc<NormalizedRecord>>>;

/// Outcome of `initialize_from_db`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Pages whose payload was restored.
    pub loaded: Vec<PageId>,
    /// Pages with nothing stored.
    pub empty: Vec<PageId>,
    /// Pages whose bulk row could not be read.
    pub failed: Vec<PageId>,
}

/// Keyed container of the current record per page.
pub struct PageStore {
    pages: RwLock<PageMap>,
    mirror: MetadataMirror,
    payloads: Arc<dyn PayloadBackend>,
    known_pages: Vec<PageId>,
}

impl PageStore {
    /// Open the store in the configured data directory.
    pub fn open(settings: &Settings) -> Result<Self> {
        std::fs::create_dir_all(&settings.data_dir)?;
        let payloads = SqlitePayloadStore::new(&settings.payload_db_path(), settings.history_retention)?;
        Ok(Self::with_backends(
            MetadataMirror::new(&settings.metadata_path()),
            Arc::new(payloads),
            settings.known_pages.clone(),
        ))
    }

    /// Build a store over explicit backends, rehydrating metadata from the
    /// mirror.
    pub fn with_backends(
        mirror: MetadataMirror,
        payloads: Arc<dyn PayloadBackend>,
        known_pages: Vec<PageId>,
    ) -> Self {
        let mut pages: PageMap = known_pages.iter().map(|p| (p.clone(), None)).collect();

        match mirror.load() {
            Ok(mirrored) => {
                for (page, record) in mirrored {
                    pages.insert(page, Some(Arc::new(record.without_payload())));
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable metadata mirror {}: {}",
                    mirror.path().display(),
                    e
                );
            }
        }

        Self {
            pages: RwLock::new(pages),
            mirror,
            payloads,
            known_pages,
        }
    }

    pub fn known_pages(&self) -> &[PageId] {
        &self.known_pages
    }

    fn read(&self) -> RwLockReadGuard<'_, PageMap> {
        self.pages.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PageMap> {
        self.pages.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current record for a page. May carry `Payload::Elsewhere` if the
    /// payload has not been loaded yet.
    pub fn get_page_data(&self, page_id: &PageId) -> Option<Arc<NormalizedRecord>> {
        self.read().get(page_id).cloned().flatten()
    }

    /// Whether the page's record is present with its payload.
    pub fn is_payload_loaded(&self, page_id: &PageId) -> bool {
        self.get_page_data(page_id)
            .is_some_and(|r| r.is_payload_loaded())
    }

    /// Snapshot of every page the store knows about.
    pub fn pages(&self) -> Vec<(PageId, Option<Arc<NormalizedRecord>>)> {
        self.read()
            .iter()
            .map(|(page, record)| (page.clone(), record.clone()))
            .collect()
    }

    /// Replace a page's record, or clear it with `None`.
    ///
    /// The bulk store is written first; if that fails the in-memory state
    /// is left untouched.
    pub async fn set_page_data(
        &self,
        page_id: &PageId,
        record: Option<NormalizedRecord>,
    ) -> Result<()> {
        let Some(record) = record else {
            return self.clear_page_data(page_id).await;
        };
        self.put_record(page_id, record).await.map(|_| ())
    }

    /// Persist a new record for a page and make it current, returning the
    /// shared in-memory copy.
    pub async fn put_record(
        &self,
        page_id: &PageId,
        record: NormalizedRecord,
    ) -> Result<Arc<NormalizedRecord>> {
        let entry = StoredEntry::new(page_id.clone(), record);
        if let Err(e) = self.payloads.put(&entry).await {
            tracing::error!("Failed to persist data for page {}: {}", page_id, e);
            return Err(e);
        }
        tracing::info!(
            "Stored {} ({} records) for page {}",
            entry.record.file_name,
            entry.record.metadata.total_records,
            page_id
        );

        let record = entry.record;
        self.write().insert(page_id.clone(), Some(record.clone()));
        self.sync_mirror();
        Ok(record)
    }

    /// Delete every bulk row for a page and clear its in-memory record.
    pub async fn clear_page_data(&self, page_id: &PageId) -> Result<()> {
        match self.payloads.delete_page(page_id).await {
            Ok(removed) => tracing::info!("Cleared {} stored rows for page {}", removed, page_id),
            Err(e) => {
                tracing::error!("Failed to clear page {}: {}", page_id, e);
                return Err(e);
            }
        }
        self.write().insert(page_id.clone(), None);
        self.sync_mirror();
        Ok(())
    }

    /// Fetch the latest bulk row for a page and restore its payload.
    ///
    /// Read failures are logged and yield `None`; the in-memory record is
    /// left as it was.
    pub async fn load_page_data_from_db(&self, page_id: &PageId) -> Option<Arc<NormalizedRecord>> {
        match self.try_load_page_data(page_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Failed to load data for page {}: {}", page_id, e);
                None
            }
        }
    }

    /// Like `load_page_data_from_db`, but surfaces read errors.
    ///
    /// A record put while the read was in flight is newer than the row the
    /// read returns, and is kept.
    pub async fn try_load_page_data(
        &self,
        page_id: &PageId,
    ) -> Result<Option<Arc<NormalizedRecord>>> {
        match self.payloads.latest(page_id).await? {
            Some(entry) => {
                let mut pages = self.write();
                let current = pages.get(page_id).cloned().flatten();
                if let Some(current) = current {
                    if current.is_payload_loaded() && current.ingested_at > entry.record.ingested_at {
                        tracing::debug!(
                            "Keeping newer record {} for page {} over stored {}",
                            current.id,
                            page_id,
                            entry.record.id
                        );
                        return Ok(Some(current));
                    }
                }
                pages.insert(page_id.clone(), Some(entry.record.clone()));
                tracing::debug!("Loaded payload for page {}", page_id);
                Ok(Some(entry.record))
            }
            None => {
                let stale = {
                    let mut pages = self.write();
                    match pages.get(page_id).cloned().flatten() {
                        // Metadata from the mirror whose bulk row is gone
                        Some(current) if !current.is_payload_loaded() => {
                            pages.insert(page_id.clone(), None);
                            true
                        }
                        Some(_) => false,
                        None => {
                            pages.insert(page_id.clone(), None);
                            false
                        }
                    }
                };
                if stale {
                    tracing::warn!(
                        "Page {} had metadata but no stored payload; clearing it",
                        page_id
                    );
                    self.sync_mirror();
                }
                Ok(None)
            }
        }
    }

    /// Restore payloads for every known page (and any page the mirror
    /// listed). A failing page is logged and does not stop the others.
    pub async fn initialize_from_db(&self) -> InitReport {
        let mut targets: Vec<PageId> = self.known_pages.clone();
        for (page, _) in self.pages() {
            if !targets.contains(&page) {
                targets.push(page);
            }
        }

        let mut report = InitReport::default();
        for page in targets {
            match self.try_load_page_data(&page).await {
                Ok(Some(_)) => report.loaded.push(page),
                Ok(None) => report.empty.push(page),
                Err(e) => {
                    tracing::warn!("Failed to rehydrate page {}: {}", page, e);
                    report.failed.push(page);
                }
            }
        }

        tracing::info!(
            "Rehydrated {} pages ({} empty, {} failed)",
            report.loaded.len(),
            report.empty.len(),
            report.failed.len()
        );
        report
    }

    /// Wipe both stores and reset every page to empty.
    ///
    /// Once the bulk store is cleared the in-memory state follows it, even
    /// if the mirror file cannot be removed; stale mirror entries are
    /// dropped on the next load.
    pub async fn clear_all_data(&self) -> Result<()> {
        let removed = self.payloads.clear().await?;

        {
            let mut pages = self.write();
            pages.clear();
            for page in &self.known_pages {
                pages.insert(page.clone(), None);
            }
        }

        if let Err(e) = self.mirror.clear() {
            tracing::warn!(
                "Failed to remove metadata mirror {}: {}",
                self.mirror.path().display(),
                e
            );
        }
        tracing::info!("Cleared all data ({} stored rows)", removed);
        Ok(())
    }

    /// Rewrite the metadata mirror from the in-memory state.
    fn sync_mirror(&self) {
        let snapshot: Vec<(PageId, Arc<NormalizedRecord>)> = self
            .read()
            .iter()
            .filter_map(|(page, record)| record.clone().map(|r| (page.clone(), r)))
            .collect();

        if let Err(e) = self
            .mirror
            .save(snapshot.iter().map(|(page, record)| (page, record.as_ref())))
        {
            tracing::warn!(
                "Failed to update metadata mirror {}: {}",
                self.mirror.path().display(),
                e
            );
        }
    }
}
