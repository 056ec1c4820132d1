//! Bulk payload store.
//!
//! Every successful import becomes a new row keyed by page and record id.
//! Readers take the most recently updated row for a page; older rows are
//! kept up to the configured retention and pruned after each write.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use super::{connect, parse_datetime, Result};
use crate::models::{format_timestamp, NormalizedRecord, PageId, StoredEntry};

/// Storage for full records, including payload.
#[async_trait]
pub trait PayloadBackend: Send + Sync {
    /// Write a new row for the entry's page.
    async fn put(&self, entry: &StoredEntry) -> Result<()>;

    /// The most recently updated row for a page.
    async fn latest(&self, page_id: &PageId) -> Result<Option<StoredEntry>>;

    /// Delete every row for a page, returning how many were removed.
    async fn delete_page(&self, page_id: &PageId) -> Result<usize>;

    /// Delete every row.
    async fn clear(&self) -> Result<usize>;
}

/// SQLite-backed payload store.
#[derive(Debug, Clone)]
pub struct SqlitePayloadStore {
    db_path: PathBuf,
    retention: usize,
}

impl SqlitePayloadStore {
    /// Open (creating if needed) the store at `db_path`, keeping at most
    /// `retention` rows per page.
    pub fn new(db_path: &Path, retention: usize) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
            retention: retention.max(1),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<()> {
        let conn = connect(&self.db_path)?;
        init_schema(&conn)?;
        Ok(())
    }

    /// Run a blocking database operation off the async runtime.
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = connect(&db_path)?;
            op(&mut conn)
        })
        .await?
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS page_entries (
            storage_key TEXT PRIMARY KEY,
            page_id TEXT NOT NULL,
            record_id TEXT NOT NULL,
            record TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_page_entries_page_updated
            ON page_entries(page_id, updated_at DESC);
    "#,
    )
}

#[async_trait]
impl PayloadBackend for SqlitePayloadStore {
    async fn put(&self, entry: &StoredEntry) -> Result<()> {
        let record = entry.record.clone();
        let storage_key = entry.storage_key.clone();
        let page_id = entry.page_id.as_str().to_string();
        let created_at = format_timestamp(&entry.created_at);
        let updated_at = format_timestamp(&entry.updated_at);
        let retention = self.retention;

        self.with_conn(move |conn| {
            let record_json = serde_json::to_string(record.as_ref())?;
            let record_id = record.id.as_str();
            let tx = conn.transaction()?;
            tx.execute(
                r#"INSERT OR REPLACE INTO page_entries
                   (storage_key, page_id, record_id, record, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                params![storage_key, page_id, record_id, record_json, created_at, updated_at],
            )?;

            // Prune old rows to keep only the last `retention` per page
            let pruned = tx.execute(
                r#"
                DELETE FROM page_entries
                WHERE page_id = ?1 AND storage_key NOT IN (
                    SELECT storage_key FROM page_entries
                    WHERE page_id = ?1
                    ORDER BY updated_at DESC, rowid DESC
                    LIMIT ?2
                )
                "#,
                params![page_id, retention as i64],
            )?;
            tx.commit()?;

            if pruned > 0 {
                tracing::debug!("Pruned {} old payload rows for page {}", pruned, page_id);
            }
            Ok(())
        })
        .await
    }

    async fn latest(&self, page_id: &PageId) -> Result<Option<StoredEntry>> {
        let page = page_id.clone();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT storage_key, record, created_at, updated_at
                     FROM page_entries
                     WHERE page_id = ?1
                     ORDER BY updated_at DESC, rowid DESC
                     LIMIT 1",
                    params![page.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>("storage_key")?,
                            row.get::<_, String>("record")?,
                            row.get::<_, String>("created_at")?,
                            row.get::<_, String>("updated_at")?,
                        ))
                    },
                )
                .optional()?;

            let Some((storage_key, record_json, created_at, updated_at)) = row else {
                return Ok(None);
            };
            let record = parse_record(&record_json)?;
            Ok(Some(StoredEntry {
                storage_key,
                page_id: page,
                record: Arc::new(record),
                created_at: parse_datetime(&created_at),
                updated_at: parse_datetime(&updated_at),
            }))
        })
        .await
    }

    async fn delete_page(&self, page_id: &PageId) -> Result<usize> {
        let page = page_id.as_str().to_string();
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM page_entries WHERE page_id = ?1", params![page])?)
        })
        .await
    }

    async fn clear(&self) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM page_entries", [])?))
            .await
    }
}

/// Parse a stored record.
///
/// Rows wrap the payload in a few levels of record structure, so a document
/// that was just within the parser's nesting limit on import would exceed it
/// here. Rows are only ever written by `put`, so the limit is lifted.
fn parse_record(json: &str) -> Result<NormalizedRecord> {
    let mut de = serde_json::Deserializer::from_str(json);
    de.disable_recursion_limit();
    let record = NormalizedRecord::deserialize(&mut de)?;
    de.end()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImportKind, RecordMetadata};
    use chrono::Duration;
    use serde_json::json;

    fn record(name: &str, payload: serde_json::Value) -> NormalizedRecord {
        NormalizedRecord::new(
            ImportKind::SingleDocumentImport,
            name,
            42,
            payload,
            RecordMetadata {
                total_records: 1,
                ..RecordMetadata::default()
            },
        )
    }

    fn store(dir: &tempfile::TempDir, retention: usize) -> SqlitePayloadStore {
        SqlitePayloadStore::new(&dir.path().join("payloads.db"), retention).unwrap()
    }

    async fn rows(store: &SqlitePayloadStore, page: &PageId) -> usize {
        let page = page.as_str().to_string();
        store
            .with_conn(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM page_entries WHERE page_id = ?1",
                    params![page],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 3);
        let page = PageId::from("browser");

        assert!(store.latest(&page).await.unwrap().is_none());

        let entry = StoredEntry::new(page.clone(), record("a.json", json!([1, 2])));
        store.put(&entry).await.unwrap();

        let loaded = store.latest(&page).await.unwrap().unwrap();
        assert_eq!(loaded.record, entry.record);
        assert_eq!(loaded.storage_key, entry.storage_key);
        assert_eq!(loaded.page_id, page);
    }

    #[tokio::test]
    async fn test_latest_prefers_most_recently_updated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 5);
        let page = PageId::from("browser");

        let mut newer = StoredEntry::new(page.clone(), record("new.json", json!([2])));
        let mut older = StoredEntry::new(page.clone(), record("old.json", json!([1])));
        newer.updated_at = older.updated_at + Duration::seconds(10);
        older.updated_at = newer.updated_at - Duration::seconds(20);

        // Insert the newer row first so rowid order disagrees with time order
        store.put(&newer).await.unwrap();
        store.put(&older).await.unwrap();

        let latest = store.latest(&page).await.unwrap().unwrap();
        assert_eq!(latest.record.file_name, "new.json");
        assert_eq!(rows(&store, &page).await, 2);
    }

    #[tokio::test]
    async fn test_retention_prunes_old_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 2);
        let page = PageId::from("devices");

        for i in 0..4 {
            let mut entry = StoredEntry::new(page.clone(), record(&format!("{}.json", i), json!([i])));
            entry.updated_at = entry.updated_at + Duration::seconds(i);
            store.put(&entry).await.unwrap();
        }

        assert_eq!(rows(&store, &page).await, 2);
        let latest = store.latest(&page).await.unwrap().unwrap();
        assert_eq!(latest.record.file_name, "3.json");
    }

    #[tokio::test]
    async fn test_delete_page_leaves_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 3);
        let a = PageId::from("a");
        let b = PageId::from("b");
        store.put(&StoredEntry::new(a.clone(), record("a.json", json!([])))).await.unwrap();
        store.put(&StoredEntry::new(b.clone(), record("b.json", json!([])))).await.unwrap();

        assert_eq!(store.delete_page(&a).await.unwrap(), 1);
        assert!(store.latest(&a).await.unwrap().is_none());
        assert!(store.latest(&b).await.unwrap().is_some());

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.latest(&b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let page = PageId::from("activity");
        let entry = StoredEntry::new(page.clone(), record("x.json", json!({"k": [1]})));
        store(&dir, 3).put(&entry).await.unwrap();

        let reopened = store(&dir, 3);
        let loaded = reopened.latest(&page).await.unwrap().unwrap();
        assert_eq!(loaded.record, entry.record);
    }

    #[tokio::test]
    async fn test_payload_at_parser_nesting_limit_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 3);
        let page = PageId::from("browser");

        let depth = 127;
        let text = format!("{}1{}", "[".repeat(depth), "]".repeat(depth));
        let payload: serde_json::Value = serde_json::from_str(&text).unwrap();
        let entry = StoredEntry::new(page.clone(), record("nested.json", payload));
        store.put(&entry).await.unwrap();

        let loaded = store.latest(&page).await.unwrap().unwrap();
        assert_eq!(loaded.record, entry.record);
    }
}
