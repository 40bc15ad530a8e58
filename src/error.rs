//! Error types for terrascope.
//!
//! The hierarchy follows the lifecycle of a coordinated operation: settings
//! and scope resolution happen before any lock is taken, lock errors before
//! any state is touched, and state/tool errors after the lock is held.
//! [`TerrascopeError::lock_retained`] tells callers which failures leave the
//! scope locked on purpose.

use std::path::PathBuf;
use thiserror::Error;

/// Exit status used when the scope lock could not be acquired.
pub const EXIT_LOCK_CONTENTION: u8 = 3;

/// Exit status used when the tool run was interrupted by the operator.
pub const EXIT_INTERRUPTED: u8 = 130;

/// The main error type for terrascope.
#[derive(Debug, Error)]
pub enum TerrascopeError {
    /// Settings-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The scope identifier could not be derived or is invalid.
    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),

    /// Lock acquisition or release errors.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// State document transfer errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// External tool errors.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Working directory preparation errors.
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Settings-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings or rendered configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The settings file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable holds an unusable value.
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// Scope resolution errors. No lock is ever attempted after one of these.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// The scope string is unusable as a lock and state key.
    #[error("Invalid scope '{scope}': {reason}")]
    Invalid {
        /// The rejected scope.
        scope: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration is not inside a git repository.
    #[error("Unable to find git top level for '{path}': {message}")]
    NoRepository {
        /// Path whose repository could not be found.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Distributed lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder owns the scope and the acquire timeout elapsed.
    #[error("Scope '{scope}' is locked by {holder} (since {since}, operation: {operation})")]
    Contention {
        /// The contended scope.
        scope: String,
        /// Identifier of the current holder.
        holder: String,
        /// When the current holder acquired the lock.
        since: String,
        /// Operation the current holder is running.
        operation: String,
    },

    /// The lock backend could not be reached or rejected the request.
    #[error("Lock backend '{backend}' unavailable: {message}")]
    BackendUnavailable {
        /// Name of the backend.
        backend: String,
        /// Description of the failure.
        message: String,
    },

    /// The operation finished but its own lock could not be released.
    #[error(
        "Lock on '{scope}' could not be released after a completed run: {message}; \
         clear it with `terrascope lock release --token {token}`"
    )]
    ReleaseFailed {
        /// Scope that is still locked.
        scope: String,
        /// Token the lock is held under.
        token: String,
        /// Description of the failure.
        message: String,
    },

    /// A stored lock record could not be decoded.
    #[error("Lock record for '{scope}' is corrupted: {message}")]
    Corrupted {
        /// Scope of the record.
        scope: String,
        /// Description of the corruption.
        message: String,
    },
}

/// State document transfer errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading the state document failed.
    #[error("Failed to read state for scope '{scope}' from {backend}: {message}")]
    Read {
        /// Scope being read.
        scope: String,
        /// Store that was read.
        backend: String,
        /// Description of the failure.
        message: String,
    },

    /// Writing the state document failed.
    #[error("Failed to write state for scope '{scope}' to {backend}: {message}")]
    Write {
        /// Scope being written.
        scope: String,
        /// Store that was written.
        backend: String,
        /// Description of the failure.
        message: String,
        /// Infrastructure already changed, local and remote state now differ.
        consistency_warning: bool,
    },
}

/// External tool errors.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool binary is not on `PATH`.
    #[error("{binary} is not installed or not on PATH")]
    NotInstalled {
        /// Name of the binary.
        binary: String,
    },

    /// The installed tool version does not match the required one.
    #[error("{binary} v{required} is required (found v{found})")]
    Version {
        /// Name of the binary.
        binary: String,
        /// Required version.
        required: String,
        /// Installed version.
        found: String,
    },

    /// The tool could not be started.
    #[error("Failed to start '{command}': {message}")]
    Spawn {
        /// Command line that failed.
        command: String,
        /// Description of the failure.
        message: String,
    },

    /// The tool exited unsuccessfully.
    #[error("'{command}' failed with exit status {}", .code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    Failed {
        /// Command line that failed.
        command: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
    },

    /// The operator interrupted the run.
    #[error("'{command}' was interrupted")]
    Interrupted {
        /// Command line that was interrupted.
        command: String,
    },
}

/// Working directory preparation errors.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The tool plugin directory is missing.
    #[error("No plugin directory found at {path}; run the tool's init first")]
    MissingPlugins {
        /// Expected plugin directory.
        path: PathBuf,
    },

    /// Filesystem operation failed while preparing the workspace.
    #[error("Failed to prepare working directory {path}: {message}")]
    Prepare {
        /// Directory being prepared.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for terrascope operations.
pub type Result<T> = std::result::Result<T, TerrascopeError>;

impl TerrascopeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error means another holder owns the scope.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(self, Self::Lock(LockError::Contention { .. }))
    }

    /// Returns true if the operation failed after the point where the lock
    /// is deliberately kept: during or after the tool run.
    #[must_use]
    pub const fn lock_retained(&self) -> bool {
        matches!(
            self,
            Self::Tool(ToolError::Failed { .. } | ToolError::Interrupted { .. } | ToolError::Spawn { .. })
                | Self::State(StateError::Write { .. })
        )
    }

    /// Returns true if local and remote state may have diverged.
    #[must_use]
    pub const fn is_consistency_warning(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::Write {
                consistency_warning: true,
                ..
            })
        )
    }

    /// Maps the error to the process exit status.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Lock(LockError::Contention { .. }) => EXIT_LOCK_CONTENTION,
            Self::Tool(ToolError::Interrupted { .. }) => EXIT_INTERRUPTED,
            Self::Tool(ToolError::Failed { code: Some(code), .. }) => {
                u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1)
            }
            _ => 1,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl ScopeError {
    /// Creates an invalid scope error.
    #[must_use]
    pub fn invalid(scope: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            scope: scope.into(),
            reason: reason.into(),
        }
    }
}

impl LockError {
    /// Creates a backend unavailability error.
    #[must_use]
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Wraps a failed release of a lock whose run already completed.
    #[must_use]
    pub fn release_failed(scope: impl Into<String>, token: impl Into<String>, cause: &TerrascopeError) -> Self {
        let message = match cause {
            TerrascopeError::Lock(Self::BackendUnavailable { message, .. }) => message.clone(),
            other => other.to_string(),
        };
        Self::ReleaseFailed {
            scope: scope.into(),
            token: token.into(),
            message,
        }
    }
}

impl StateError {
    /// Creates a read error.
    #[must_use]
    pub fn read(scope: impl Into<String>, backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Read {
            scope: scope.into(),
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Creates a write error that happened before infrastructure changed.
    #[must_use]
    pub fn write(scope: impl Into<String>, backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Write {
            scope: scope.into(),
            backend: backend.into(),
            message: message.into(),
            consistency_warning: false,
        }
    }

    /// Marks a write error as leaving local and remote state inconsistent.
    #[must_use]
    pub fn into_consistency_warning(self) -> Self {
        match self {
            Self::Write {
                scope,
                backend,
                message,
                ..
            } => Self::Write {
                scope,
                backend,
                message,
                consistency_warning: true,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_exit_code() {
        let err = TerrascopeError::Lock(LockError::Contention {
            scope: "infra/network".into(),
            holder: "alice@host:1".into(),
            since: "2024-01-01T00:00:00Z".into(),
            operation: "apply".into(),
        });

        assert!(err.is_contention());
        assert!(!err.lock_retained());
        assert_eq!(err.exit_code(), EXIT_LOCK_CONTENTION);
    }

    #[test]
    fn test_tool_failure_passes_exit_code_through() {
        let err = TerrascopeError::Tool(ToolError::Failed {
            command: "terraform apply".into(),
            code: Some(2),
        });
        assert_eq!(err.exit_code(), 2);
        assert!(err.lock_retained());

        let unknown = TerrascopeError::Tool(ToolError::Failed {
            command: "terraform apply".into(),
            code: None,
        });
        assert_eq!(unknown.exit_code(), 1);
        assert!(unknown.to_string().contains("unknown"));
    }

    #[test]
    fn test_consistency_warning_marking() {
        let err = StateError::write("infra/network", "s3", "timeout");
        assert!(!TerrascopeError::State(err).is_consistency_warning());

        let err = StateError::write("infra/network", "s3", "timeout").into_consistency_warning();
        let err = TerrascopeError::State(err);
        assert!(err.is_consistency_warning());
        assert!(err.lock_retained());
    }

    #[test]
    fn test_read_errors_do_not_retain_lock() {
        let err = TerrascopeError::State(StateError::read("infra/network", "s3", "denied"));
        assert!(!err.lock_retained());
        assert_eq!(err.exit_code(), 1);
    }
}
