//! Scope identifiers.
//!
//! A scope names one independently lockable unit of infrastructure. By
//! default it is the configuration file's path relative to the git
//! repository top level, so the same file always maps to the same lock and
//! state key regardless of where the repository is checked out.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScopeError;

/// Identifier for one logical unit of infrastructure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope(String);

impl Scope {
    /// Creates a scope from an explicit identifier.
    ///
    /// Backslashes are normalised to `/` and surrounding slashes trimmed.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty, contains `.` or `..`
    /// segments, empty segments, or control characters.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ScopeError> {
        let raw = raw.as_ref();
        let normalised = raw.replace('\\', "/");
        let trimmed = normalised.trim_matches('/');

        if trimmed.is_empty() {
            return Err(ScopeError::invalid(raw, "scope cannot be empty"));
        }

        if trimmed.chars().any(char::is_control) {
            return Err(ScopeError::invalid(raw, "scope cannot contain control characters"));
        }

        for segment in trimmed.split('/') {
            match segment {
                "" => return Err(ScopeError::invalid(raw, "scope cannot contain empty segments")),
                "." | ".." => {
                    return Err(ScopeError::invalid(raw, "scope cannot contain '.' or '..' segments"));
                }
                _ => {}
            }
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Derives the scope of `config_path` relative to `top_level`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is outside `top_level` or the
    /// resulting identifier is invalid.
    pub fn for_path(config_path: &Path, top_level: &Path) -> Result<Self, ScopeError> {
        let relative = config_path.strip_prefix(top_level).map_err(|_| {
            ScopeError::invalid(
                config_path.display().to_string(),
                format!("path is outside the repository at {}", top_level.display()),
            )
        })?;

        let segments: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        Self::new(segments.join("/"))
    }

    /// Returns the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Scope {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Scope {
    type Error = ScopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.0
    }
}

/// Finds the git repository top level containing `path`.
///
/// # Errors
///
/// Returns an error if git is unavailable or `path` is not in a repository.
pub fn git_toplevel(path: &Path) -> Result<PathBuf, ScopeError> {
    let dir = if path.is_dir() {
        path
    } else {
        path.parent().unwrap_or_else(|| Path::new("."))
    };

    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir)
        .output()
        .map_err(|e| ScopeError::NoRepository {
            path: path.to_path_buf(),
            message: format!("failed to run git: {e}"),
        })?;

    let top_level = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || top_level.is_empty() {
        return Err(ScopeError::NoRepository {
            path: path.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!("Repository top level: {top_level}");
    Ok(PathBuf::from(top_level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_normalisation() {
        let scope = Scope::new("/infra\\network/").expect("valid scope");
        assert_eq!(scope.as_str(), "infra/network");
        assert_eq!(scope.to_string(), "infra/network");
    }

    #[test]
    fn test_invalid_scopes() {
        assert!(Scope::new("").is_err());
        assert!(Scope::new("///").is_err());
        assert!(Scope::new("infra/../prod").is_err());
        assert!(Scope::new("infra//network").is_err());
        assert!(Scope::new("infra/\nnetwork").is_err());
    }

    #[test]
    fn test_scope_for_path() {
        let scope = Scope::for_path(
            Path::new("/repo/infra/network.rb"),
            Path::new("/repo"),
        )
        .expect("path inside repo");
        assert_eq!(scope.as_str(), "infra/network.rb");
    }

    #[test]
    fn test_scope_for_path_outside_repo() {
        let result = Scope::for_path(Path::new("/elsewhere/network.rb"), Path::new("/repo"));
        assert!(matches!(result, Err(ScopeError::Invalid { .. })));
    }

    #[test]
    fn test_scope_serde_rejects_invalid() {
        let parsed: Scope = serde_json::from_str("\"infra/network\"").expect("valid scope");
        assert_eq!(parsed.as_str(), "infra/network");
        assert!(serde_json::from_str::<Scope>("\"../etc\"").is_err());
    }
}
