//! State document handling.
//!
//! This module moves the tool's state document between the local slot in
//! the working directory and a durable remote store keyed by scope. The
//! document itself is never interpreted.

mod document;
mod fs;
mod local;
mod memory;
mod s3;
mod store;
mod sync;

use std::path::Path;
use std::sync::Arc;

use crate::config::{StateBackendKind, StateSettings};
use crate::error::{ConfigError, Result};

pub use document::StateDocument;
pub use fs::FsStateStore;
pub use local::{LocalStateSlot, STATE_FILENAME};
pub use memory::MemoryStateStore;
pub use s3::S3StateStore;
pub use store::RemoteStateStore;
pub use sync::{LocalSync, RemoteSync, StateSync, migrate_to_local, migrate_to_remote};

/// Builds the configured remote store, or `None` for the `local` backend.
///
/// Relative filesystem paths are resolved against `top_level`.
///
/// # Errors
///
/// Returns an error if the backend is missing its bucket or path.
pub async fn build_remote_store(
    settings: &StateSettings,
    top_level: &Path,
) -> Result<Option<Arc<dyn RemoteStateStore>>> {
    let store: Arc<dyn RemoteStateStore> = match settings.backend {
        StateBackendKind::Local => return Ok(None),
        StateBackendKind::Filesystem => {
            let path = settings
                .path
                .as_deref()
                .ok_or_else(|| ConfigError::validation("Filesystem state backend requires a path", "state.path"))?;
            Arc::new(FsStateStore::new(top_level.join(path)))
        }
        StateBackendKind::S3 => {
            let bucket = settings
                .bucket
                .as_deref()
                .ok_or_else(|| ConfigError::validation("S3 state backend requires a bucket", "state.bucket"))?;
            Arc::new(S3StateStore::new(bucket, settings.prefix.as_deref(), settings.region.as_deref()).await)
        }
    };

    Ok(Some(store))
}

/// Picks the synchronisation strategy.
///
/// Remote sync is used when it is enabled and a store exists; otherwise
/// the operator's state file in `state_dir` is the durable copy.
#[must_use]
pub fn build_sync(
    settings: &StateSettings,
    store: Option<&Arc<dyn RemoteStateStore>>,
    state_dir: &Path,
) -> Arc<dyn StateSync> {
    match store {
        Some(store) if settings.sync => Arc::new(RemoteSync::new(Arc::clone(store))),
        _ => Arc::new(LocalSync::new(LocalStateSlot::in_dir(state_dir))),
    }
}
