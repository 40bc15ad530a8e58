//! Filesystem remote state store.
//!
//! Documents live at `<root>/<scope>/terraform.tfstate`, typically on a
//! shared mount. Each scope directory is just a [`LocalStateSlot`], so
//! writes get the same temp-file-and-rename treatment.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::config::Scope;
use crate::error::{Result, StateError};

use super::document::StateDocument;
use super::local::LocalStateSlot;
use super::store::RemoteStateStore;

/// Filesystem state store.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    /// Root directory of the store.
    root: PathBuf,
}

impl FsStateStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot(&self, scope: &Scope) -> LocalStateSlot {
        LocalStateSlot::in_dir(self.root.join(scope.as_str()))
    }
}

#[async_trait]
impl RemoteStateStore for FsStateStore {
    async fn get(&self, scope: &Scope) -> Result<Option<StateDocument>> {
        let slot = self.slot(scope);
        debug!("Loading state from {}", slot.path().display());

        slot.read().await.map_err(|e| {
            StateError::read(scope.as_str(), "filesystem", format!("{}: {e}", slot.path().display())).into()
        })
    }

    async fn put(&self, scope: &Scope, doc: &StateDocument) -> Result<()> {
        let slot = self.slot(scope);
        debug!("Saving state to {}", slot.path().display());

        slot.write(doc).await.map_err(|e| {
            StateError::write(scope.as_str(), "filesystem", format!("{}: {e}", slot.path().display())).into()
        })
    }

    fn backend_type(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scopes_map_to_directories() {
        let temp = TempDir::new().expect("temp dir");
        let store = FsStateStore::new(temp.path());
        let network = Scope::new("infra/network").expect("valid scope");
        let dns = Scope::new("infra/dns").expect("valid scope");

        store.put(&network, &StateDocument::from("N")).await.expect("put");
        store.put(&dns, &StateDocument::from("D")).await.expect("put");

        assert_eq!(store.get(&network).await.expect("get"), Some(StateDocument::from("N")));
        assert_eq!(store.get(&dns).await.expect("get"), Some(StateDocument::from("D")));
        assert!(store.root().join("infra/network/terraform.tfstate").exists());
    }

    #[tokio::test]
    async fn test_missing_document() {
        let temp = TempDir::new().expect("temp dir");
        let store = FsStateStore::new(temp.path());
        let scope = Scope::new("infra/network").expect("valid scope");
        assert!(store.get(&scope).await.expect("get").is_none());
    }
}
