//! Settings parser for loading `terrascope.yaml`.
//!
//! Precedence, lowest first: built-in defaults, the settings file,
//! `TERRASCOPE_*` environment variables (optionally from a `.env` file next
//! to the settings), then operator knobs from the command line.

use crate::error::{ConfigError, Result, TerrascopeError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::Settings;

/// Default settings file names to search for.
pub const DEFAULT_SETTINGS_FILES: &[&str] = &["terrascope.yaml", "terrascope.yml", ".terrascope.yaml"];

/// Parser for terrascope settings.
#[derive(Debug, Default)]
pub struct SettingsParser {
    /// Base path for locating `.env`.
    base_path: Option<PathBuf>,
}

impl SettingsParser {
    /// Creates a new settings parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to locate `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Settings> {
        let path = path.as_ref();
        info!("Loading settings from: {}", path.display());

        if !path.exists() {
            return Err(TerrascopeError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            TerrascopeError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses settings from a YAML string.
    ///
    /// An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Settings> {
        debug!("Parsing YAML settings");

        if content.trim().is_empty() {
            return Ok(Settings::default());
        }

        serde_yaml::from_str(content).map_err(|e| {
            TerrascopeError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })
    }

    /// Loads settings with environment variable overrides.
    ///
    /// With no file, the defaults are used as the base.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// override has an unusable value.
    pub fn load_with_env(&self, path: Option<&Path>) -> Result<Settings> {
        let mut settings = match path {
            Some(path) => self.load_file(path)?,
            None => {
                debug!("No settings file found, using defaults");
                Settings::default()
            }
        };

        Self::apply_env_overrides(&mut settings)?;
        Ok(settings)
    }

    /// Applies `TERRASCOPE_*` environment overrides.
    fn apply_env_overrides(settings: &mut Settings) -> Result<()> {
        if let Ok(bucket) = std::env::var("TERRASCOPE_LOCK_BUCKET") {
            debug!("Overriding lock.bucket from environment");
            settings.lock.bucket = Some(bucket);
        }

        if let Ok(timeout) = std::env::var("TERRASCOPE_LOCK_TIMEOUT") {
            debug!("Overriding lock.timeout_secs from environment");
            settings.lock.timeout_secs = timeout.parse().map_err(|_| {
                TerrascopeError::Config(ConfigError::InvalidEnvVar {
                    name: String::from("TERRASCOPE_LOCK_TIMEOUT"),
                    value: timeout.clone(),
                })
            })?;
        }

        if let Ok(bucket) = std::env::var("TERRASCOPE_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            settings.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("TERRASCOPE_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            settings.state.prefix = Some(prefix);
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                TerrascopeError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Finds the settings file in `start_dir` or its ancestors.
#[must_use]
pub fn find_settings_file(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start_dir.as_ref().to_path_buf();

    loop {
        for filename in DEFAULT_SETTINGS_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found settings file: {}", candidate.display());
                return Some(candidate);
            }
        }

        if !current.pop() {
            return None;
        }
    }
}
