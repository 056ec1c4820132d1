//! Physical stores behind the page store.
//!
//! - `payloads`: bulk store holding full records, one row per import
//! - `metadata`: small mirror file with payloads stripped, read at startup

pub mod metadata;
pub mod payloads;

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

pub use metadata::MetadataMirror;
pub use payloads::{PayloadBackend, SqlitePayloadStore};

/// Errors from either physical store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl From<tokio::task::JoinError> for PersistenceError {
    fn from(e: tokio::task::JoinError) -> Self {
        PersistenceError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Open a database connection with proper concurrency settings.
pub(crate) fn connect(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 30000;
    "#,
    )?;
    Ok(conn)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_falls_back_to_epoch() {
        assert_eq!(parse_datetime("garbage"), DateTime::UNIX_EPOCH);
        let parsed = parse_datetime("2024-05-06T07:08:09.000010Z");
        assert_eq!(parsed.timestamp(), 1714979289);
    }
}
