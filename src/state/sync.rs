//! State synchronisation between the tool's slot and the durable copy.
//!
//! The strategy is chosen once at construction: [`RemoteSync`] treats the
//! remote store as the source of truth, [`LocalSync`] never talks to a
//! remote store and only carries the operator's local state file into and
//! out of the per-invocation working directory.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::Scope;
use crate::error::{Result, StateError};

use super::document::StateDocument;
use super::local::LocalStateSlot;
use super::store::RemoteStateStore;

const LOCAL: &str = "local";

/// Moves the state document around a tool run.
#[async_trait]
pub trait StateSync: Send + Sync {
    /// Materialises the authoritative document into `slot` before the run.
    ///
    /// Returns the document written, or `None` if there was nothing to
    /// pull, in which case the slot is left untouched.
    async fn pull(&self, scope: &Scope, slot: &LocalStateSlot) -> Result<Option<StateDocument>>;

    /// Publishes `slot`'s document after a successful mutating run.
    async fn push(&self, scope: &Scope, slot: &LocalStateSlot) -> Result<()>;

    /// Returns true if this strategy reads and writes a remote store.
    fn is_remote(&self) -> bool;
}

/// Synchronisation through a remote store.
pub struct RemoteSync {
    /// The authoritative store.
    store: Arc<dyn RemoteStateStore>,
}

impl RemoteSync {
    /// Creates a remote strategy over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStateStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for RemoteSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSync")
            .field("store", &self.store.backend_type())
            .finish()
    }
}

#[async_trait]
impl StateSync for RemoteSync {
    async fn pull(&self, scope: &Scope, slot: &LocalStateSlot) -> Result<Option<StateDocument>> {
        let Some(doc) = self.store.get(scope).await? else {
            info!("No remote state for {scope} yet");
            return Ok(None);
        };

        slot.write(&doc).await.map_err(|e| {
            StateError::read(scope.as_str(), LOCAL, format!("{}: {e}", slot.path().display()))
        })?;

        info!(
            "Pulled state for {scope} from {} ({} bytes, {})",
            self.store.backend_type(),
            doc.len(),
            doc.short_digest()
        );
        Ok(Some(doc))
    }

    async fn push(&self, scope: &Scope, slot: &LocalStateSlot) -> Result<()> {
        let doc = slot
            .read()
            .await
            .map_err(|e| StateError::write(scope.as_str(), LOCAL, format!("{}: {e}", slot.path().display())))?
            .ok_or_else(|| {
                StateError::write(
                    scope.as_str(),
                    self.store.backend_type(),
                    format!("no state document at {} to publish", slot.path().display()),
                )
            })?;

        self.store.put(scope, &doc).await?;
        info!(
            "Pushed state for {scope} to {} ({} bytes, {})",
            self.store.backend_type(),
            doc.len(),
            doc.short_digest()
        );
        Ok(())
    }

    fn is_remote(&self) -> bool {
        true
    }
}

/// Local-only synchronisation.
///
/// `home` is the operator's state file. It is copied into the working
/// directory before the run and copied back after a mutating run.
#[derive(Debug, Clone)]
pub struct LocalSync {
    /// The operator's state file.
    home: LocalStateSlot,
}

impl LocalSync {
    /// Creates a local strategy around `home`.
    #[must_use]
    pub const fn new(home: LocalStateSlot) -> Self {
        Self { home }
    }
}

#[async_trait]
impl StateSync for LocalSync {
    async fn pull(&self, scope: &Scope, slot: &LocalStateSlot) -> Result<Option<StateDocument>> {
        if *slot == self.home {
            return Ok(None);
        }

        let doc = self
            .home
            .read()
            .await
            .map_err(|e| StateError::read(scope.as_str(), LOCAL, format!("{}: {e}", self.home.path().display())))?;

        let Some(doc) = doc else {
            debug!("No local state at {}", self.home.path().display());
            return Ok(None);
        };

        slot.write(&doc).await.map_err(|e| {
            StateError::read(scope.as_str(), LOCAL, format!("{}: {e}", slot.path().display()))
        })?;
        Ok(Some(doc))
    }

    async fn push(&self, scope: &Scope, slot: &LocalStateSlot) -> Result<()> {
        if *slot == self.home {
            return Ok(());
        }

        let doc = slot
            .read()
            .await
            .map_err(|e| StateError::write(scope.as_str(), LOCAL, format!("{}: {e}", slot.path().display())))?;

        let Some(doc) = doc else {
            debug!("Tool left no state file in {}", slot.path().display());
            return Ok(());
        };

        self.home.write(&doc).await.map_err(|e| {
            StateError::write(scope.as_str(), LOCAL, format!("{}: {e}", self.home.path().display()))
        })?;
        debug!("Saved local state to {} ({})", self.home.path().display(), doc.short_digest());
        Ok(())
    }

    fn is_remote(&self) -> bool {
        false
    }
}

/// Moves the local document into the remote store and removes the local
/// copy. An empty slot is a no-op.
///
/// # Errors
///
/// Returns a read error if the slot cannot be read and a write error if
/// either the remote write or the local delete fails.
pub async fn migrate_to_remote(
    scope: &Scope,
    slot: &LocalStateSlot,
    store: &dyn RemoteStateStore,
) -> Result<Option<StateDocument>> {
    let doc = slot
        .read()
        .await
        .map_err(|e| StateError::read(scope.as_str(), LOCAL, format!("{}: {e}", slot.path().display())))?;

    let Some(doc) = doc else {
        info!("No local state for {scope}; nothing to migrate");
        return Ok(None);
    };

    store.put(scope, &doc).await?;
    slot.delete()
        .await
        .map_err(|e| StateError::write(scope.as_str(), LOCAL, format!("{}: {e}", slot.path().display())))?;

    info!("Migrated state for {scope} to {} ({})", store.backend_type(), doc.short_digest());
    Ok(Some(doc))
}

/// Copies the remote document into the local slot. The remote copy is left
/// in place.
///
/// # Errors
///
/// Returns a read error if the remote store fails and a write error if the
/// slot cannot be written.
pub async fn migrate_to_local(
    scope: &Scope,
    slot: &LocalStateSlot,
    store: &dyn RemoteStateStore,
) -> Result<Option<StateDocument>> {
    let Some(doc) = store.get(scope).await? else {
        info!("No remote state for {scope}; nothing to migrate");
        return Ok(None);
    };

    slot.write(&doc)
        .await
        .map_err(|e| StateError::write(scope.as_str(), LOCAL, format!("{}: {e}", slot.path().display())))?;

    info!("Copied state for {scope} from {} to {}", store.backend_type(), slot.path().display());
    Ok(Some(doc))
}
