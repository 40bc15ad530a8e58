// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Terrascope
//!
//! Runs a declarative infrastructure tool against one *scope* at a time,
//! under a distributed lock, with the scope's state document handed to the
//! tool before the run and published after it.
//!
//! ## Overview
//!
//! A scope is the path of a rendered configuration relative to the
//! repository top level, for example `infra/network`. For every operation
//! terrascope:
//!
//! 1. **Locks** the scope (waiting with backoff, or stealing with `--force`)
//! 2. **Pulls** the authoritative state into a fresh working directory
//! 3. **Runs** the tool (`plan`, `graph`, `validate`, `apply`, `destroy`, `import`)
//! 4. **Pushes** the state back after mutating commands
//! 5. **Releases** the lock, or keeps it if the run or push failed
//!
//! ## Modules
//!
//! - [`config`]: Settings file, environment overrides and scope naming
//! - [`lock`]: Scope locks over S3, the filesystem, or nothing
//! - [`state`]: Remote state stores and the pull/push strategies
//! - [`tool`]: Tool invocations and the subprocess runner
//! - [`workspace`]: Per-run working directories
//! - [`coordinator`]: The lock, sync, run, sync, release lifecycle
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! lock:
//!   backend: s3
//!   bucket: acme-terraform-locks
//!   timeout_secs: 300
//!
//! state:
//!   backend: s3
//!   bucket: acme-terraform-state
//!   prefix: live/
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
mod s3;
pub mod state;
pub mod tool;
pub mod workspace;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{Scope, Settings, SettingsParser, SettingsValidator};
pub use coordinator::{Coordinator, OperationReport, Phase, StateView};
pub use error::{Result, TerrascopeError};
pub use lock::{BackendLock, LockRecord, LockToken, NoopLock, ScopeLock};
pub use state::{LocalStateSlot, RemoteStateStore, StateDocument, StateSync};
pub use tool::{TerraformRunner, ToolCommand, ToolInvocation, ToolRunner};
pub use workspace::Workspace;
