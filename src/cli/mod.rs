//! Command-line interface for eval-forge.
//!
//! Provides commands for running evaluation suites, validating suite
//! definitions, and the sandbox-scoped agent tools.

mod commands;

pub use commands::{
    parse_cli, run_with_cli, Cli, Commands, RunArgs, ToolArgs, ToolCommand, ValidateArgs,
};
