//! Command-line interface for taskforge.
//!
//! Provides commands for running a simulated orchestration session and for
//! validating configuration from the environment.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
