//! Filesystem lock backend.
//!
//! Records are JSON files under a root directory that may live on shared
//! storage, one file per scope (`<root>/<scope>.lock`). Creation is a hard
//! link from a fully written temp file, which fails atomically if the
//! record already exists. Overwrites and compare-and-delete are serialised
//! across processes by an advisory lock on a sidecar guard file.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tracing::debug;
use uuid::Uuid;

use crate::config::Scope;
use crate::error::{LockError, Result, TerrascopeError};

use super::backend::{DeleteOutcome, LockBackend, PutOutcome};
use super::record::{LockRecord, LockToken};

/// Filesystem lock backend.
#[derive(Debug, Clone)]
pub struct FsLockBackend {
    /// Directory holding lock records.
    root: PathBuf,
}

impl FsLockBackend {
    /// Creates a backend rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs blocking filesystem work off the async runtime.
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || work(&root))
            .await
            .map_err(|e| TerrascopeError::from(LockError::unavailable("filesystem", format!("task failed: {e}"))))?
    }
}

/// Path of the record file for `scope`.
fn record_path(root: &Path, scope: &Scope) -> PathBuf {
    root.join(format!("{scope}.lock"))
}

/// Path of the guard file serialising mutations of `scope`'s record.
fn guard_path(root: &Path, scope: &Scope) -> PathBuf {
    root.join(format!("{scope}.lock.guard"))
}

fn unavailable(action: &str, path: &Path, e: &std::io::Error) -> TerrascopeError {
    LockError::unavailable("filesystem", format!("Failed to {action} {}: {e}", path.display())).into()
}

/// Holds the guard file's exclusive lock until dropped.
struct Guard(File);

impl Guard {
    fn acquire(root: &Path, scope: &Scope) -> Result<Self> {
        let path = guard_path(root, scope);
        ensure_parent(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| unavailable("open guard", &path, &e))?;

        file.lock_exclusive()
            .map_err(|e| unavailable("lock guard", &path, &e))?;

        Ok(Self(file))
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| unavailable("create directory", parent, &e))?;
    }
    Ok(())
}

/// Writes `record` to a unique temp file next to `target` and returns it.
fn write_temp(target: &Path, record: &LockRecord) -> Result<PathBuf> {
    ensure_parent(target)?;

    let content = serde_json::to_vec_pretty(record)
        .map_err(|e| LockError::unavailable("filesystem", format!("Failed to serialize lock: {e}")))?;

    let temp = target.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    let mut file = File::create(&temp).map_err(|e| unavailable("create", &temp, &e))?;
    file.write_all(&content).map_err(|e| unavailable("write", &temp, &e))?;
    file.sync_all().map_err(|e| unavailable("sync", &temp, &e))?;

    Ok(temp)
}

fn read_record(root: &Path, scope: &Scope) -> Result<Option<LockRecord>> {
    let path = record_path(root, scope);

    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unavailable("read", &path, &e)),
    };

    let record = serde_json::from_slice(&content).map_err(|e| LockError::Corrupted {
        scope: scope.to_string(),
        message: format!("Failed to parse {}: {e}", path.display()),
    })?;

    Ok(Some(record))
}

#[async_trait]
impl LockBackend for FsLockBackend {
    async fn put_if_absent(&self, scope: &Scope, record: &LockRecord) -> Result<PutOutcome> {
        let scope = scope.clone();
        let record = record.clone();

        self.blocking(move |root| {
            let target = record_path(root, &scope);
            let temp = write_temp(&target, &record)?;

            let linked = fs::hard_link(&temp, &target);
            let _ = fs::remove_file(&temp);

            match linked {
                Ok(()) => {
                    debug!("Created lock record {}", target.display());
                    Ok(PutOutcome::Created)
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(PutOutcome::AlreadyExists),
                Err(e) => Err(unavailable("create", &target, &e)),
            }
        })
        .await
    }

    async fn put_unconditional(&self, scope: &Scope, record: &LockRecord) -> Result<()> {
        let scope = scope.clone();
        let record = record.clone();

        self.blocking(move |root| {
            let _guard = Guard::acquire(root, &scope)?;
            let target = record_path(root, &scope);
            let temp = write_temp(&target, &record)?;

            fs::rename(&temp, &target).map_err(|e| {
                let _ = fs::remove_file(&temp);
                unavailable("replace", &target, &e)
            })?;

            debug!("Replaced lock record {}", target.display());
            Ok(())
        })
        .await
    }

    async fn delete_if_matches(&self, scope: &Scope, token: &LockToken) -> Result<DeleteOutcome> {
        let scope = scope.clone();
        let token = token.clone();

        self.blocking(move |root| {
            let _guard = Guard::acquire(root, &scope)?;

            match read_record(root, &scope)? {
                Some(existing) if existing.token == token => {
                    let target = record_path(root, &scope);
                    fs::remove_file(&target).map_err(|e| unavailable("delete", &target, &e))?;
                    Ok(DeleteOutcome::Deleted)
                }
                _ => Ok(DeleteOutcome::Mismatch),
            }
        })
        .await
    }

    async fn get(&self, scope: &Scope) -> Result<Option<LockRecord>> {
        let scope = scope.clone();
        self.blocking(move |root| read_record(root, &scope)).await
    }

    fn backend_type(&self) -> &'static str {
        "filesystem"
    }
}
