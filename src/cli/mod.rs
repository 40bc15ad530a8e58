//! CLI module for terrascope.
//!
//! This module provides the command-line interface for running the
//! infrastructure tool under a scope lock.

mod commands;
mod output;

pub use commands::{Cli, Commands, LockCommands, OperatorArgs, OutputFormat};
pub use output::{OutputFormatter, recovery_hint};
