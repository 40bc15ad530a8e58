//! Distributed scope lock.
//!
//! This module provides:
//! - Lock records and ownership tokens
//! - The [`LockBackend`] capability trait and its memory, filesystem and S3
//!   implementations
//! - The [`ScopeLock`] strategies built on top of them

mod backend;
mod fs;
mod memory;
mod record;
mod s3;
mod scope_lock;

use std::path::Path;
use std::sync::Arc;

use crate::config::{LockBackendKind, LockSettings};
use crate::error::{ConfigError, Result};

pub use backend::{DeleteOutcome, LockBackend, PutOutcome};
pub use fs::FsLockBackend;
pub use memory::MemoryLockBackend;
pub use record::{LockRecord, LockToken, NOOP_TOKEN, generate_holder_id};
pub use s3::S3LockBackend;
pub use scope_lock::{Backoff, BackendLock, NoopLock, ScopeLock};

/// Default lock directory, relative to the repository top level.
pub const DEFAULT_LOCK_DIR: &str = ".terrascope/locks";

/// Builds the lock strategy selected by `settings`.
///
/// Relative filesystem paths are resolved against `top_level`.
///
/// # Errors
///
/// Returns an error if the S3 backend is selected without a bucket.
pub async fn build_lock(settings: &LockSettings, top_level: &Path) -> Result<Arc<dyn ScopeLock>> {
    let timeout = settings.timeout();

    let lock: Arc<dyn ScopeLock> = match settings.backend {
        LockBackendKind::None => Arc::new(NoopLock),
        LockBackendKind::Filesystem => {
            let root = settings
                .path
                .as_deref()
                .map_or_else(|| top_level.join(DEFAULT_LOCK_DIR), |p| top_level.join(p));
            Arc::new(BackendLock::new(FsLockBackend::new(root), timeout))
        }
        LockBackendKind::S3 => {
            let bucket = settings
                .bucket
                .as_deref()
                .ok_or_else(|| ConfigError::validation("S3 lock backend requires a bucket", "lock.bucket"))?;
            let backend = S3LockBackend::new(bucket, settings.prefix.as_deref(), settings.region.as_deref()).await;
            Arc::new(BackendLock::new(backend, timeout))
        }
    };

    Ok(lock)
}
