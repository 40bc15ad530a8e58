//! Settings validation.
//!
//! Catches backend settings that would otherwise only fail once a lock is
//! held or the tool has already run.

use crate::error::{ConfigError, Result, TerrascopeError};
use tracing::debug;

use super::settings::{LockBackendKind, LockSettings, Settings, StateBackendKind, StateSettings, ToolSettings};

/// Validator for terrascope settings.
#[derive(Debug, Default)]
pub struct SettingsValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl SettingsValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates settings.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, settings: &Settings) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_lock(&settings.lock, &mut result);
        Self::validate_state(&settings.state, &mut result);
        Self::validate_tool(&settings.tool, &mut result);

        if settings.lock.backend == LockBackendKind::None && settings.state.remote_enabled() {
            result.warnings.push(String::from(
                "Remote state is enabled without locking; concurrent runs can overwrite each other's state",
            ));
        }

        if result.errors.is_empty() {
            debug!("Settings validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(TerrascopeError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )))
        }
    }

    /// Validates lock settings.
    fn validate_lock(lock: &LockSettings, result: &mut ValidationResult) {
        if lock.backend == LockBackendKind::S3 && lock.bucket.as_deref().is_none_or(str::is_empty) {
            result.errors.push(ValidationError {
                field: String::from("lock.bucket"),
                message: String::from("S3 bucket is required when using the s3 lock backend"),
            });
        }

        if lock.backend != LockBackendKind::None && lock.timeout_secs == 0 {
            result.warnings.push(String::from(
                "lock.timeout_secs is 0; a contended lock fails immediately",
            ));
        }
    }

    /// Validates state settings.
    fn validate_state(state: &StateSettings, result: &mut ValidationResult) {
        if state.remote_requested && !state.remote_configured() {
            result.errors.push(ValidationError {
                field: String::from("state.backend"),
                message: String::from(
                    "--remote-state needs a remote backend; set state.backend or state.bucket",
                ),
            });
        }

        match state.backend {
            StateBackendKind::S3 if state.bucket.as_deref().is_none_or(str::is_empty) => {
                result.errors.push(ValidationError {
                    field: String::from("state.bucket"),
                    message: String::from("S3 bucket is required when using the s3 state backend"),
                });
            }
            StateBackendKind::Filesystem if state.path.as_deref().is_none_or(str::is_empty) => {
                result.errors.push(ValidationError {
                    field: String::from("state.path"),
                    message: String::from("A directory is required when using the filesystem state backend"),
                });
            }
            _ => {}
        }
    }

    /// Validates tool settings.
    fn validate_tool(tool: &ToolSettings, result: &mut ValidationResult) {
        if tool.binary.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("tool.binary"),
                message: String::from("Tool binary cannot be empty"),
            });
        }

        if !tool.require_plugins {
            result.warnings.push(format!(
                "Plugin directory '{}' is optional; the tool may fail to find providers",
                tool.plugin_dir
            ));
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
