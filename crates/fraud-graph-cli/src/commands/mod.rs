//! CLI command handlers
//!
//! Each handler returns the process exit code: 0 on success, 1 on error.
//!
//! - `build_graph`: CSV -> aggregated tables -> graph artifact
//! - `train`: graph artifact -> best checkpoint + `predictions.json`
//! - `evaluate`: graph artifact + checkpoint -> metrics report

pub mod build_graph;
pub mod evaluate;
pub mod train;

use tracing::error;

/// Log the error chain and print it to stderr, returning exit code 1.
pub(crate) fn fail(context: &str, err: anyhow::Error) -> u8 {
    error!("{}: {:#}", context, err);
    eprintln!("Error: {}: {:#}", context, err);
    1
}
