//! Command-line interface for nipoppy.
//!
//! Provides commands for status reconciliation, manifest generation,
//! participant queries and workflow runs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
