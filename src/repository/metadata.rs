//! Metadata mirror file.
//!
//! Holds every page's current record with its payload replaced by
//! `Payload::Elsewhere`, so counts and file details are available as soon as
//! the process starts without touching the bulk store.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::Result;
use crate::models::{NormalizedRecord, PageId};

const MIRROR_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MirrorFile {
    version: u32,
    pages: BTreeMap<PageId, NormalizedRecord>,
}

/// JSON file mirroring record metadata per page.
#[derive(Debug, Clone)]
pub struct MetadataMirror {
    path: PathBuf,
}

impl MetadataMirror {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the mirror. A missing file is an empty mirror.
    pub fn load(&self) -> Result<BTreeMap<PageId, NormalizedRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        let file: MirrorFile = serde_json::from_str(&contents)?;
        if file.version != MIRROR_VERSION {
            tracing::warn!(
                "Metadata mirror {} has version {}, expected {}",
                self.path.display(),
                file.version,
                MIRROR_VERSION
            );
        }
        Ok(file.pages)
    }

    /// Replace the mirror with `pages`, stripping any payloads.
    ///
    /// Written to a temporary file and renamed over the target so a crash
    /// never leaves a half-written mirror.
    pub fn save<'a>(
        &self,
        pages: impl IntoIterator<Item = (&'a PageId, &'a NormalizedRecord)>,
    ) -> Result<()> {
        let file = MirrorFile {
            version: MIRROR_VERSION,
            pages: pages
                .into_iter()
                .map(|(page, record)| (page.clone(), record.without_payload()))
                .collect(),
        };

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &file)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Remove the mirror file if present.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
