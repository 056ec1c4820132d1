//! Command-line interface for takeout-explorer.

mod commands;
mod helpers;

pub use commands::{is_verbose, run};
