//! Archive decoding for zip-compatible export bundles.
//!
//! The decoder takes ownership of the archive bytes and hands entries out
//! one at a time, so callers can stop early and the input buffer is
//! released as soon as decoding returns. A corrupt entry is reported by
//! name and decoding moves on to the next one.

use std::io::{Cursor, Read};
use std::ops::ControlFlow;

use thiserror::Error;
use zip::ZipArchive;

/// Errors that make the whole archive unreadable.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Archive is empty")]
    Empty,

    #[error("Invalid archive: {0}")]
    InvalidArchive(#[from] zip::result::ZipError),
}

/// A successfully decompressed entry.
#[derive(Debug, Clone)]
pub struct DecodedEntry {
    /// Path within the archive.
    pub name: String,
    /// Uncompressed bytes.
    pub data: Vec<u8>,
}

/// An entry that could not be decompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub name: String,
    pub error: String,
}

/// One entry's outcome, as delivered to the callback.
#[derive(Debug)]
pub enum EntryOutcome {
    Decoded(DecodedEntry),
    Failed(FailedEntry),
}

/// Position of the current entry among the archive's file entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPosition {
    pub index: usize,
    pub total: usize,
}

/// Totals from a callback-driven decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub total: usize,
    pub decoded: usize,
    pub failed: Vec<String>,
    /// The callback asked to stop before every entry was visited.
    pub stopped: bool,
}

/// Archive decoder for zip files.
pub struct ArchiveDecoder;

impl ArchiveDecoder {
    /// Check if a MIME type represents a supported archive format.
    pub fn is_archive_mime(mime_type: &str) -> bool {
        let base = mime_type.split(';').next().unwrap_or(mime_type).trim();
        matches!(
            base.to_ascii_lowercase().as_str(),
            "application/zip" | "application/x-zip" | "application/x-zip-compressed"
        )
    }

    /// Decode entries one by one, handing each to `on_entry`.
    ///
    /// Returning `ControlFlow::Break` from the callback stops decoding; the
    /// summary then has `stopped` set.
    pub fn decode_each<F>(bytes: Vec<u8>, mut on_entry: F) -> Result<DecodeSummary, DecodeError>
    where
        F: FnMut(EntryPosition, EntryOutcome) -> ControlFlow<()>,
    {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let indices = Self::file_indices(&mut archive);
        let total = indices.len();
        let mut summary = DecodeSummary {
            total,
            ..DecodeSummary::default()
        };

        for (position, index) in indices.into_iter().enumerate() {
            let outcome = Self::read_entry(&mut archive, index);
            match &outcome {
                EntryOutcome::Decoded(_) => summary.decoded += 1,
                EntryOutcome::Failed(failed) => {
                    tracing::warn!("Failed to decode archive entry {}: {}", failed.name, failed.error);
                    summary.failed.push(failed.name.clone());
                }
            }

            let at = EntryPosition {
                index: position,
                total,
            };
            if on_entry(at, outcome).is_break() {
                summary.stopped = true;
                break;
            }
        }

        Ok(summary)
    }

    /// Indices of file entries, skipping directories and macOS metadata.
    fn file_indices(archive: &mut ZipArchive<Cursor<Vec<u8>>>) -> Vec<usize> {
        let mut indices = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            // Entries whose headers cannot be read are still attempted so
            // they get reported as failures.
            let keep = match archive.by_index_raw(i) {
                Ok(file) => !file.is_dir() && !file.name().starts_with("__MACOSX"),
                Err(_) => true,
            };
            if keep {
                indices.push(i);
            }
        }
        indices
    }

    fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, index: usize) -> EntryOutcome {
        let name = archive
            .by_index_raw(index)
            .map(|file| file.name().to_string())
            .unwrap_or_else(|_| format!("entry #{}", index));

        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                return EntryOutcome::Failed(FailedEntry {
                    name,
                    error: e.to_string(),
                })
            }
        };

        let mut data = Vec::with_capacity(file.size().min(64 * 1024 * 1024) as usize);
        match file.read_to_end(&mut data) {
            Ok(_) => EntryOutcome::Decoded(DecodedEntry { name, data }),
            Err(e) => EntryOutcome::Failed(FailedEntry {
                name,
                error: e.to_string(),
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{build_zip, corrupt_stored_content};
    use super::*;

    #[derive(Debug, Default)]
    struct Collected {
        entries: Vec<DecodedEntry>,
        failed: Vec<FailedEntry>,
    }

    fn collect(bytes: Vec<u8>) -> Result<Collected, DecodeError> {
        let mut collected = Collected::default();
        ArchiveDecoder::decode_each(bytes, |_, outcome| {
            match outcome {
                EntryOutcome::Decoded(entry) => collected.entries.push(entry),
                EntryOutcome::Failed(failed) => collected.failed.push(failed),
            }
            ControlFlow::Continue(())
        })?;
        Ok(collected)
    }

    #[test]
    fn test_is_archive_mime() {
        assert!(ArchiveDecoder::is_archive_mime("application/zip"));
        assert!(ArchiveDecoder::is_archive_mime("application/x-zip-compressed"));
        assert!(ArchiveDecoder::is_archive_mime("Application/Zip; charset=binary"));
        assert!(!ArchiveDecoder::is_archive_mime("application/json"));
    }

    #[test]
    fn test_decode_all_entries() {
        let bytes = build_zip(&[("a.json", b"[1,2]"), ("dir/b.json", b"{}")]);
        let decoded = collect(bytes).unwrap();
        assert_eq!(decoded.entries.len(), 2);
        assert!(decoded.failed.is_empty());
        assert_eq!(decoded.entries[0].name, "a.json");
        assert_eq!(decoded.entries[0].data, b"[1,2]");
        assert_eq!(decoded.entries[1].name, "dir/b.json");
    }

    #[test]
    fn test_corrupt_entry_reported_not_fatal() {
        let mut bytes = build_zip(&[
            ("good.json", b"[1]"),
            ("bad.json", b"[\"CORRUPTED-CONTENT-MARKER\"]"),
            ("also-good.json", b"[2]"),
        ]);
        corrupt_stored_content(&mut bytes, b"CORRUPTED-CONTENT-MARKER");

        let decoded = collect(bytes).unwrap();
        let names: Vec<_> = decoded.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["good.json", "also-good.json"]);
        assert_eq!(decoded.failed.len(), 1);
        assert_eq!(decoded.failed[0].name, "bad.json");
    }

    #[test]
    fn test_invalid_bytes_fail() {
        let result = collect(b"definitely not a zip file".to_vec());
        assert!(matches!(result, Err(DecodeError::InvalidArchive(_))));
    }

    #[test]
    fn test_empty_bytes_fail() {
        assert!(matches!(
            collect(Vec::new()),
            Err(DecodeError::Empty)
        ));
    }

    #[test]
    fn test_truncated_archive_fails() {
        let bytes = build_zip(&[("a.json", b"[1,2,3]")]);
        let truncated = bytes[..bytes.len() / 2].to_vec();
        assert!(collect(truncated).is_err());
    }

    #[test]
    fn test_callback_can_stop_early() {
        let bytes = build_zip(&[("a.json", b"1"), ("b.json", b"2"), ("c.json", b"3")]);
        let mut seen = Vec::new();
        let summary = ArchiveDecoder::decode_each(bytes, |at, outcome| {
            if let EntryOutcome::Decoded(entry) = outcome {
                seen.push(entry.name);
            }
            if at.index == 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        assert_eq!(seen, vec!["a.json", "b.json"]);
        assert_eq!(summary.total, 3);
        assert!(summary.stopped);
    }

    #[test]
    fn test_directories_skipped() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("Takeout/", options).unwrap();
        writer.start_file("Takeout/a.json", options).unwrap();
        std::io::Write::write_all(&mut writer, b"[]").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let decoded = collect(bytes).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].name, "Takeout/a.json");
    }
}
