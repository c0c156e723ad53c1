//! Command-line interface for permitwatch.

mod commands;

pub use commands::{is_verbose, run};
