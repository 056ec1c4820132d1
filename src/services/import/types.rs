//! Import service types and errors.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::archive::{ArchiveDecoder, DecodeError};
use crate::config::Settings;
use crate::models::PageId;
use crate::repository::PersistenceError;
use crate::utils::has_extension;

/// Errors that make an input unusable.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Input is empty")]
    EmptyInput,
}

/// Errors ending an import job.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to store import: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Import cancelled")]
    Cancelled,

    #[error("Import worker failed: {0}")]
    Worker(String),
}

impl ImportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportError::Cancelled)
    }
}

/// Where the input bytes come from.
#[derive(Debug, Clone)]
pub enum ImportSource {
    /// A file on disk, read in chunks by the worker.
    Path(PathBuf),
    /// Bytes already in memory.
    Bytes { file_name: String, data: Vec<u8> },
}

impl ImportSource {
    /// Display name of the input.
    pub fn file_name(&self) -> String {
        match self {
            ImportSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            ImportSource::Bytes { file_name, .. } => file_name.clone(),
        }
    }
}

/// An import job descriptor.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub page_id: PageId,
    pub source: ImportSource,
    /// Declared content type, consulted when the name has no known extension.
    pub content_type: Option<String>,
}

impl ImportRequest {
    pub fn from_path(page_id: impl Into<PageId>, path: &Path) -> Self {
        Self {
            page_id: page_id.into(),
            source: ImportSource::Path(path.to_path_buf()),
            content_type: None,
        }
    }

    pub fn from_bytes(
        page_id: impl Into<PageId>,
        file_name: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            page_id: page_id.into(),
            source: ImportSource::Bytes {
                file_name: file_name.into(),
                data,
            },
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Input format, decided before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Archive,
    Json,
}

impl SourceFormat {
    /// Pick the format from the file name, then the content type.
    pub fn detect(file_name: &str, content_type: Option<&str>) -> Result<Self, ParseError> {
        if has_extension(file_name, "zip") {
            return Ok(SourceFormat::Archive);
        }
        if has_extension(file_name, "json") {
            return Ok(SourceFormat::Json);
        }

        if let Some(content_type) = content_type {
            if ArchiveDecoder::is_archive_mime(content_type) {
                return Ok(SourceFormat::Archive);
            }
            let base = content_type
                .split(';')
                .next()
                .unwrap_or(content_type)
                .trim()
                .to_ascii_lowercase();
            if base == "application/json" || base.ends_with("+json") {
                return Ok(SourceFormat::Json);
            }
        }

        Err(ParseError::UnsupportedFileType(file_name.to_string()))
    }
}

/// Tunables for import jobs.
#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub read_chunk_bytes: usize,
    pub record_chunk_size: usize,
    pub progress_buffer: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ImportOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            read_chunk_bytes: settings.read_chunk_bytes.max(1),
            record_chunk_size: settings.record_chunk_size.max(1),
            progress_buffer: settings.progress_buffer.max(1),
        }
    }
}
