//! Progress events pushed from an import worker to its controller.

use serde::{Deserialize, Serialize};

/// Status carried by each progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Parsing,
    Complete,
    Error,
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Parsing)
    }
}

/// Lifecycle of a single import job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Reading,
    Decoding,
    Extracting,
    Counting,
    Complete,
    Error,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Decoding => "decoding",
            Self::Extracting => "extracting",
            Self::Counting => "counting",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Snapshot of an import's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub file_name: String,
    /// 0-100, non-decreasing within a job.
    pub progress: f64,
    pub status: ImportStatus,
    pub records_processed: u64,
    pub total_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
