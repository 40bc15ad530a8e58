//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::OperatorOptions;

/// Terrascope - scope-locked infrastructure runs with shared state.
#[derive(Parser, Debug)]
#[command(name = "terrascope")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the settings file (defaults to the nearest terrascope.yaml).
    #[arg(long, global = true, env = "TERRASCOPE_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Operator knobs shared by every command.
    #[command(flatten)]
    pub operator: OperatorArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Knobs that override the settings file.
#[derive(Args, Debug, Clone, Default)]
pub struct OperatorArgs {
    /// Lock and state scope (defaults to the config path relative to the git top level).
    #[arg(long, global = true, env = "TERRASCOPE_SCOPE")]
    pub scope: Option<String>,

    /// Seconds to wait for a contended lock.
    #[arg(long, global = true, value_name = "SECONDS")]
    pub lock_timeout: Option<u64>,

    /// Steal the lock instead of waiting for it.
    #[arg(long, global = true)]
    pub force: bool,

    /// Run without taking the lock.
    #[arg(long, global = true)]
    pub no_lock: bool,

    /// Pull and push state through the remote store.
    #[arg(long, global = true, conflicts_with = "local_state")]
    pub remote_state: bool,

    /// Keep state in the local state file only.
    #[arg(long, global = true)]
    pub local_state: bool,

    /// Directory holding the local state file (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Keep the working directory after the run.
    #[arg(long, global = true)]
    pub keep: bool,

    /// Resource addresses to target (comma separated or repeated).
    #[arg(long, global = true, value_delimiter = ',')]
    pub target: Vec<String>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the changes an apply would make.
    Plan {
        /// Rendered configuration file.
        config: PathBuf,
    },

    /// Render the resource graph.
    Graph {
        /// Rendered configuration file.
        config: PathBuf,
    },

    /// Check the configuration for errors.
    Validate {
        /// Rendered configuration file.
        config: PathBuf,
    },

    /// Apply the configuration.
    Apply {
        /// Rendered configuration file.
        config: PathBuf,
    },

    /// Destroy every resource in the configuration.
    Destroy {
        /// Rendered configuration file.
        config: PathBuf,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Bring an existing resource under management.
    Import {
        /// Rendered configuration file.
        config: PathBuf,

        /// Resource address in the configuration.
        address: String,

        /// Provider-specific resource identifier.
        id: String,
    },

    /// Print the authoritative state document.
    ShowState {
        /// Rendered configuration file.
        config: PathBuf,
    },

    /// Move the local state file into the remote store.
    UseRemoteState {
        /// Rendered configuration file.
        config: PathBuf,
    },

    /// Copy the remote state into the local state file.
    UseLocalState {
        /// Rendered configuration file.
        config: PathBuf,
    },

    /// Check the settings file.
    CheckSettings {
        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Inspect or clear the scope lock.
    Lock {
        /// Lock subcommand.
        #[command(subcommand)]
        command: LockCommands,
    },
}

/// Lock management subcommands.
#[derive(Subcommand, Debug)]
pub enum LockCommands {
    /// Show who holds the lock.
    Status {
        /// Rendered configuration file.
        config: PathBuf,
    },

    /// Take the lock from its holder and release it.
    Clear {
        /// Rendered configuration file.
        config: PathBuf,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Release a lock held under a known token.
    Release {
        /// Rendered configuration file.
        config: PathBuf,

        /// Token of the lock to release.
        #[arg(long)]
        token: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Commands {
    /// Returns the configuration file the command operates on, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&PathBuf> {
        match self {
            Self::Plan { config }
            | Self::Graph { config }
            | Self::Validate { config }
            | Self::Apply { config }
            | Self::Destroy { config, .. }
            | Self::Import { config, .. }
            | Self::ShowState { config }
            | Self::UseRemoteState { config }
            | Self::UseLocalState { config }
            | Self::Lock {
                command:
                    LockCommands::Status { config }
                    | LockCommands::Clear { config, .. }
                    | LockCommands::Release { config, .. },
            } => Some(config),
            Self::CheckSettings { .. } => None,
        }
    }
}

impl OperatorArgs {
    /// Converts the flags into settings overrides.
    #[must_use]
    pub fn to_options(&self) -> OperatorOptions {
        let remote_state = if self.remote_state {
            Some(true)
        } else if self.local_state {
            Some(false)
        } else {
            None
        };

        OperatorOptions {
            scope: self.scope.clone(),
            lock_timeout_secs: self.lock_timeout,
            force: self.force,
            no_lock: self.no_lock,
            remote_state,
            keep: self.keep,
            targets: self.target.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply_with_knobs() {
        let cli = Cli::try_parse_from([
            "terrascope",
            "apply",
            "infra/network.tf.json",
            "--force",
            "--lock-timeout",
            "30",
            "--target",
            "aws_vpc.main,aws_subnet.a",
            "--remote-state",
        ])
        .expect("parse");

        assert!(matches!(cli.command, Commands::Apply { .. }));
        let options = cli.operator.to_options();
        assert!(options.force);
        assert_eq!(options.lock_timeout_secs, Some(30));
        assert_eq!(options.targets, vec!["aws_vpc.main", "aws_subnet.a"]);
        assert_eq!(options.remote_state, Some(true));
    }

    #[test]
    fn test_parse_import() {
        let cli = Cli::try_parse_from(["terrascope", "import", "network.tf.json", "aws_vpc.main", "vpc-123"])
            .expect("parse");
        match cli.command {
            Commands::Import { address, id, .. } => {
                assert_eq!(address, "aws_vpc.main");
                assert_eq!(id, "vpc-123");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_remote_and_local_state_conflict() {
        let result = Cli::try_parse_from([
            "terrascope",
            "plan",
            "network.tf.json",
            "--remote-state",
            "--local-state",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_lock_release_requires_token() {
        assert!(Cli::try_parse_from(["terrascope", "lock", "release", "network.tf.json"]).is_err());

        let cli = Cli::try_parse_from(["terrascope", "lock", "release", "network.tf.json", "--token", "abc"])
            .expect("parse");
        assert_eq!(cli.command.config(), Some(&PathBuf::from("network.tf.json")));
    }
}
