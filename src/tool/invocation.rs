//! Tool invocations and the runner trait.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Tool subcommand to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum ToolCommand {
    /// Show the changes an apply would make.
    Plan,
    /// Render the resource graph.
    Graph,
    /// Check the configuration for errors.
    Validate,
    /// Apply the configuration.
    Apply,
    /// Destroy every resource in the configuration.
    Destroy,
    /// Bring an existing resource under management.
    Import {
        /// Resource address in the configuration.
        address: String,
        /// Provider-specific resource identifier.
        id: String,
    },
}

impl ToolCommand {
    /// Returns the subcommand name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Graph => "graph",
            Self::Validate => "validate",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Import { .. } => "import",
        }
    }

    /// Returns true if the command can change infrastructure or state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(self, Self::Apply | Self::Destroy | Self::Import { .. })
    }

    /// Returns true if the command honours `-target`.
    const fn accepts_targets(&self) -> bool {
        matches!(self, Self::Plan | Self::Apply | Self::Destroy)
    }

    /// Returns true if the command honours `-lock-timeout`.
    const fn accepts_lock_timeout(&self) -> bool {
        !matches!(self, Self::Graph | Self::Validate)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One run of the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Subcommand to run.
    pub command: ToolCommand,
    /// Directory the tool runs in.
    pub working_dir: PathBuf,
    /// Resource addresses to restrict the run to.
    pub targets: Vec<String>,
    /// Timeout for the tool's own state lock.
    pub lock_timeout: Option<Duration>,
}

impl ToolInvocation {
    /// Creates an invocation with no targets.
    #[must_use]
    pub fn new(command: ToolCommand, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            working_dir: working_dir.into(),
            targets: Vec::new(),
            lock_timeout: None,
        }
    }

    /// Restricts the run to `targets`.
    #[must_use]
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    /// Passes a lock timeout to the tool.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Builds the argument list.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.command.name().to_string()];

        match &self.command {
            ToolCommand::Apply | ToolCommand::Destroy => {
                args.push("-auto-approve".to_string());
                args.push("-backup=-".to_string());
            }
            ToolCommand::Import { .. } => args.push("-backup=-".to_string()),
            _ => {}
        }

        if self.command.accepts_targets() {
            args.extend(self.targets.iter().map(|t| format!("-target={t}")));
        }

        if self.command.accepts_lock_timeout() {
            if let Some(timeout) = self.lock_timeout {
                args.push(format!("-lock-timeout={}s", timeout.as_secs()));
            }
        }

        if let ToolCommand::Import { address, id } = &self.command {
            args.push(address.clone());
            args.push(id.clone());
        }

        args
    }

    /// Returns the command line for messages.
    #[must_use]
    pub fn display(&self, binary: &str) -> String {
        format!("{binary} {}", self.args().join(" "))
    }
}

/// Result of a successful tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Command line that ran.
    pub command: String,
    /// Wall-clock time of the run.
    pub duration: Duration,
}

/// Runs the external tool.
///
/// Failures (non-zero exit, spawn errors, interrupts) are returned as
/// [`ToolError`](crate::error::ToolError)s.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs `invocation` to completion.
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutcome>;
}
