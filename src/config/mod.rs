//! Configuration module for terrascope.
//!
//! This module handles everything resolved once at startup:
//! - Parsing `terrascope.yaml` and applying environment overrides
//! - Merging the operator's command-line knobs
//! - Validation of backend settings
//! - Deriving the scope identifier for the configuration being run

mod parser;
mod scope;
mod settings;
mod validator;

pub use parser::{SettingsParser, find_settings_file};
pub use scope::{Scope, git_toplevel};
pub use settings::{
    DEFAULT_LOCK_TIMEOUT_SECS, LockBackendKind, LockSettings, OperatorOptions, Settings,
    StateBackendKind, StateSettings, ToolSettings, WorkspaceSettings,
};
pub use validator::{SettingsValidator, ValidationResult};
