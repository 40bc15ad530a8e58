//! Settings types for terrascope.
//!
//! These structs map to `terrascope.yaml`. Every section is optional; an
//! absent file yields the defaults (filesystem lock, local state only).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time to wait for a contended lock, in seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

/// The root settings structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Lock backend settings.
    #[serde(default)]
    pub lock: LockSettings,
    /// State backend settings.
    #[serde(default)]
    pub state: StateSettings,
    /// External tool settings.
    #[serde(default)]
    pub tool: ToolSettings,
    /// Working directory settings.
    #[serde(default)]
    pub workspace: WorkspaceSettings,
}

/// Lock backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockSettings {
    /// Backend type.
    #[serde(default)]
    pub backend: LockBackendKind,
    /// S3 bucket holding lock records (s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix for lock records.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Directory holding lock records (filesystem backend).
    #[serde(default)]
    pub path: Option<String>,
    /// How long to wait for a contended lock before giving up.
    #[serde(default = "default_lock_timeout")]
    pub timeout_secs: u64,
}

/// Lock backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockBackendKind {
    /// Lock records stored in S3 with conditional writes.
    S3,
    /// Lock records stored in a directory, possibly on shared storage.
    #[default]
    Filesystem,
    /// No coordination; for single-writer setups.
    None,
}

/// State backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateSettings {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackendKind,
    /// S3 bucket name (s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Root directory of the remote store (filesystem backend).
    #[serde(default)]
    pub path: Option<String>,
    /// Whether operations pull and push through the remote store.
    ///
    /// Migrations use the configured store regardless.
    #[serde(default = "default_true")]
    pub sync: bool,
    /// Set when remote state was asked for on the command line.
    #[serde(skip)]
    pub remote_requested: bool,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    /// Remote state disabled; the tool's local state file is authoritative.
    #[default]
    Local,
    /// Remote state in S3.
    S3,
    /// Remote state in a shared directory.
    Filesystem,
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSettings {
    /// Tool binary name or path.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Exact version the tool must report, if pinned.
    #[serde(default)]
    pub required_version: Option<String>,
    /// Plugin directory relative to the repository top level.
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: String,
    /// Whether a missing plugin directory aborts the operation.
    #[serde(default = "default_true")]
    pub require_plugins: bool,
}

/// Working directory settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceSettings {
    /// Keep the per-invocation working directory after the run.
    #[serde(default)]
    pub keep: bool,
}

/// Knobs the operator passes on the command line.
///
/// They take precedence over the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorOptions {
    /// Explicit scope instead of the path-derived one.
    pub scope: Option<String>,
    /// Lock acquire timeout override, in seconds.
    pub lock_timeout_secs: Option<u64>,
    /// Steal the lock instead of acquiring it.
    pub force: bool,
    /// Skip locking entirely.
    pub no_lock: bool,
    /// Force remote state on or off.
    pub remote_state: Option<bool>,
    /// Keep the working directory.
    pub keep: bool,
    /// Resource addresses to restrict the tool to.
    pub targets: Vec<String>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            backend: LockBackendKind::default(),
            bucket: None,
            prefix: None,
            region: None,
            path: None,
            timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            backend: StateBackendKind::default(),
            bucket: None,
            prefix: None,
            region: None,
            path: None,
            sync: true,
            remote_requested: false,
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            required_version: None,
            plugin_dir: default_plugin_dir(),
            require_plugins: true,
        }
    }
}

impl LockSettings {
    /// Returns the acquire timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StateSettings {
    /// Returns true if a remote store is configured.
    #[must_use]
    pub const fn remote_configured(&self) -> bool {
        !matches!(self.backend, StateBackendKind::Local)
    }

    /// Returns true if operations treat the remote store as authoritative.
    #[must_use]
    pub const fn remote_enabled(&self) -> bool {
        self.sync && self.remote_configured()
    }
}

impl Settings {
    /// Applies command-line knobs on top of the file settings.
    ///
    /// Enabling remote state on a `local` backend switches to S3 when a
    /// bucket is configured; otherwise the backend is left alone.
    /// Disabling it keeps the backend so migrations can still reach it.
    pub fn apply_operator_options(&mut self, options: &OperatorOptions) {
        if options.no_lock {
            self.lock.backend = LockBackendKind::None;
        }

        if let Some(timeout) = options.lock_timeout_secs {
            self.lock.timeout_secs = timeout;
        }

        match options.remote_state {
            Some(false) => {
                self.state.sync = false;
                self.state.remote_requested = false;
            }
            Some(true) => {
                self.state.sync = true;
                self.state.remote_requested = true;
                if !self.state.remote_configured() && self.state.bucket.is_some() {
                    self.state.backend = StateBackendKind::S3;
                }
            }
            None => {}
        }

        if options.keep {
            self.workspace.keep = true;
        }
    }
}

const fn default_lock_timeout() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

fn default_binary() -> String {
    String::from("terraform")
}

fn default_plugin_dir() -> String {
    String::from(".terraform")
}

const fn default_true() -> bool {
    true
}
