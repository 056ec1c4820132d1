//! Shared utility functions.
//!
//! - `format`: human-readable sizes and percentages
//! - `filename`: file name sanitising and extension checks

mod filename;
mod format;

pub use filename::{has_extension, sanitize_filename};
pub use format::{format_percent, format_size};
