//! Service layer for takeout-explorer business logic.
//!
//! This module contains domain logic separated from UI concerns.
//! Services can be used by the CLI or other front ends.

pub mod import;

pub use import::{
    ImportCanceller, ImportError, ImportHandle, ImportOptions, ImportRequest, ImportResult,
    ImportSource, Importer, ParseError, SourceFormat,
};
