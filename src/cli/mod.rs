//! Command-line interface for castforge.
//!
//! Provides commands for serving the HTTP API, managing episodes, and
//! running pipeline actions from the terminal.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
