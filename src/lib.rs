//! takeout-explorer - ingestion and normalization for personal data exports.
//!
//! Turns schema-less JSON exports, alone or bundled in zip archives, into
//! normalized records stored per page, with a metadata mirror for instant
//! startup and a bulk store for full payloads.

pub mod analysis;
pub mod archive;
pub mod cli;
pub mod config;
pub mod models;
pub mod repository;
pub mod services;
pub mod store;
pub mod utils;

pub use analysis::{Analyzer, KeyTable};
pub use models::{NormalizedRecord, PageId, Payload, ProgressEvent};
pub use services::{ImportError, ImportRequest, Importer};
pub use store::{InitReport, PageStore};
