//! Per-invocation working directory.
//!
//! Every operation runs the tool in a fresh `<top>/tmp/<uuid>/` directory
//! holding a copy of the plugin directory and the rendered configuration.
//! The directory is removed when the [`Workspace`] is dropped unless it
//! was asked to be kept.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::ToolSettings;
use crate::error::{ConfigError, Result, WorkspaceError};

/// Directory under the repository top level holding working directories.
pub const WORKSPACE_ROOT: &str = "tmp";

/// A prepared working directory.
#[derive(Debug)]
pub struct Workspace {
    /// The working directory.
    dir: PathBuf,
    /// The rendered configuration inside it.
    config_file: PathBuf,
    /// Leave the directory in place on drop.
    keep: bool,
}

impl Workspace {
    /// Prepares a working directory for `config` under `top_level`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is missing or not JSON, if the
    /// plugin directory is required but missing, or if any copy fails.
    pub fn prepare(top_level: &Path, config: &Path, tool: &ToolSettings, keep: bool) -> Result<Self> {
        let rendered = read_rendered(config)?;

        let plugins = top_level.join(&tool.plugin_dir);
        let has_plugins = plugins.is_dir();
        if !has_plugins {
            if tool.require_plugins {
                return Err(WorkspaceError::MissingPlugins { path: plugins }.into());
            }
            warn!("No plugin directory at {}; continuing without it", plugins.display());
        }

        let dir = top_level.join(WORKSPACE_ROOT).join(Uuid::new_v4().to_string());
        fs::create_dir_all(&dir).map_err(|e| prepare_error(&dir, &e))?;

        // From here on, drop cleans up whatever was created.
        let workspace = Self {
            config_file: dir.join(format!("{}.tf.json", config_name(config))),
            dir,
            keep,
        };

        if has_plugins {
            let name = plugins.file_name().map_or_else(|| PathBuf::from(".terraform"), PathBuf::from);
            copy_dir(&plugins, &workspace.dir.join(name))?;
        }

        fs::write(&workspace.config_file, rendered).map_err(|e| prepare_error(&workspace.config_file, &e))?;

        debug!("Prepared working directory {}", workspace.dir.display());
        Ok(workspace)
    }

    /// Returns the working directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Returns the rendered configuration path.
    #[must_use]
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.keep {
            info!("Keeping working directory {}", self.dir.display());
            return;
        }

        if let Err(e) = fs::remove_dir_all(&self.dir) {
            warn!("Failed to remove working directory {}: {e}", self.dir.display());
        }
    }
}

/// Derives the configuration name: `network.tf.json` and `network.json`
/// both give `network`.
fn config_name(config: &Path) -> String {
    let file_name = config
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let name = file_name.strip_suffix(".json").unwrap_or(&file_name);
    let name = name.strip_suffix(".tf").unwrap_or(name);

    if name == file_name {
        config
            .file_stem()
            .map_or_else(|| file_name.clone(), |s| s.to_string_lossy().to_string())
    } else {
        name.to_string()
    }
}

/// Reads the rendered configuration and pretty-prints it.
fn read_rendered(config: &Path) -> Result<String> {
    let content = fs::read_to_string(config).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound {
                path: config.to_path_buf(),
            }
        } else {
            ConfigError::ParseError {
                message: format!("Failed to read {}: {e}", config.display()),
                location: None,
            }
        }
    })?;

    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
        message: format!("Rendered configuration is not valid JSON: {e}"),
        location: Some(format!("{}:{}:{}", config.display(), e.line(), e.column())),
    })?;

    serde_json::to_string_pretty(&value).map_err(|e| {
        ConfigError::ParseError {
            message: format!("Failed to render configuration: {e}"),
            location: None,
        }
        .into()
    })
}

/// Recursively copies `source` to `dest`.
fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|e| WorkspaceError::Prepare {
            path: source.to_path_buf(),
            message: e.to_string(),
        })?;

        let rel_path = entry.path().strip_prefix(source).unwrap_or_else(|_| entry.path());
        let target = dest.join(rel_path);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| prepare_error(&target, &e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| prepare_error(&target, &e))?;
        }
    }
    Ok(())
}

fn prepare_error(path: &Path, e: &std::io::Error) -> WorkspaceError {
    WorkspaceError::Prepare {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
