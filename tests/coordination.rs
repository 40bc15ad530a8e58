//! Integration tests for scope locking and state hand-off.
//!
//! Each coordinator stands in for a separate process: they share nothing
//! but the lock backend and the state store.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use terrascope::config::Scope;
use terrascope::coordinator::{Coordinator, Phase};
use terrascope::error::{Result, ToolError};
use terrascope::lock::{BackendLock, FsLockBackend, LockBackend, LockToken, MemoryLockBackend, ScopeLock};
use terrascope::state::{LocalStateSlot, MemoryStateStore, RemoteStateStore, RemoteSync, StateDocument};
use terrascope::tool::{ToolInvocation, ToolOutcome, ToolRunner};

/// Tool stand-in that writes a fixed state document, or fails.
struct FakeTool {
    writes: Option<&'static str>,
    fail_with: Option<i32>,
    runs: AtomicU32,
}

impl FakeTool {
    fn writing(content: &'static str) -> Self {
        Self {
            writes: Some(content),
            fail_with: None,
            runs: AtomicU32::new(0),
        }
    }

    fn read_only() -> Self {
        Self {
            writes: None,
            fail_with: None,
            runs: AtomicU32::new(0),
        }
    }

    fn failing(code: i32) -> Self {
        Self {
            writes: None,
            fail_with: Some(code),
            runs: AtomicU32::new(0),
        }
    }

    fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolRunner for FakeTool {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        if let Some(code) = self.fail_with {
            return Err(ToolError::Failed {
                command: invocation.display("terraform"),
                code: Some(code),
            }
            .into());
        }

        if let Some(content) = self.writes {
            LocalStateSlot::in_dir(&invocation.working_dir)
                .write(&StateDocument::from(content))
                .await?;
        }

        Ok(ToolOutcome {
            command: invocation.display("terraform"),
            duration: Duration::ZERO,
        })
    }
}

fn scope() -> Scope {
    Scope::new("infra/network").unwrap()
}

fn coordinator(
    locks: &MemoryLockBackend,
    store: &MemoryStateStore,
    tool: Arc<FakeTool>,
    home: &Path,
) -> Coordinator {
    let store: Arc<dyn RemoteStateStore> = Arc::new(store.clone());
    Coordinator::new(
        Arc::new(BackendLock::new(locks.clone(), Duration::ZERO)),
        Arc::new(RemoteSync::new(Arc::clone(&store))),
        tool,
        LocalStateSlot::in_dir(home),
    )
    .with_store(Some(store))
}

/// acquire, contend, release, re-acquire with a fresh token.
#[tokio::test]
async fn test_lock_lifecycle() {
    let backend = MemoryLockBackend::new();
    let first = BackendLock::new(backend.clone(), Duration::ZERO);
    let second = BackendLock::new(backend.clone(), Duration::ZERO);

    let t1 = first.acquire(&scope(), "apply").await.unwrap();
    let err = second.acquire(&scope(), "plan").await.unwrap_err();
    assert!(err.is_contention());

    first.release(&scope(), &t1).await.unwrap();
    let t2 = second.acquire(&scope(), "plan").await.unwrap();
    assert_ne!(t1, t2);
}

/// Releasing with a token that no longer matches leaves the holder alone.
#[tokio::test]
async fn test_stale_release_is_a_no_op() {
    let backend = MemoryLockBackend::new();
    let lock = BackendLock::new(backend.clone(), Duration::ZERO);

    let current = lock.acquire(&scope(), "apply").await.unwrap();
    lock.release(&scope(), &LockToken::from_string("someone-else")).await.unwrap();

    let holder = backend.get(&scope()).await.unwrap().unwrap();
    assert_eq!(holder.token, current);
}

/// Remote document D lands in an empty working directory and a read-only
/// run never writes it back.
#[tokio::test]
async fn test_plan_pulls_without_pushing() {
    let locks = MemoryLockBackend::new();
    let store = MemoryStateStore::new();
    store.put(&scope(), &StateDocument::from("D")).await.unwrap();

    let workdir = TempDir::new().unwrap();
    let home = TempDir::new().unwrap();
    let tool = Arc::new(FakeTool::read_only());

    let report = coordinator(&locks, &store, tool.clone(), home.path())
        .plan(&scope(), workdir.path())
        .await
        .unwrap();

    assert_eq!(tool.runs(), 1);
    assert!(!report.pushed);
    assert!(!report.phases.contains(&Phase::SyncingOut));
    assert_eq!(store.put_count(), 1);
    assert_eq!(
        LocalStateSlot::in_dir(workdir.path()).read().await.unwrap(),
        Some(StateDocument::from("D"))
    );
}

/// A failed apply keeps the lock; an operator steals it, retries and the
/// scope ends up unlocked with the new state published.
#[tokio::test]
async fn test_failed_apply_recovered_by_forced_retry() {
    let locks = MemoryLockBackend::new();
    let store = MemoryStateStore::new();
    let home = TempDir::new().unwrap();

    let failed = TempDir::new().unwrap();
    let err = coordinator(&locks, &store, Arc::new(FakeTool::failing(1)), home.path())
        .apply(&scope(), failed.path())
        .await
        .unwrap_err();
    assert!(err.lock_retained());
    assert_eq!(err.exit_code(), 1);
    assert_eq!(store.put_count(), 0);

    // Nobody else gets in while the scope is inconsistent.
    let blocked = TempDir::new().unwrap();
    let tool = Arc::new(FakeTool::read_only());
    let err = coordinator(&locks, &store, tool.clone(), home.path())
        .plan(&scope(), blocked.path())
        .await
        .unwrap_err();
    assert!(err.is_contention());
    assert_eq!(tool.runs(), 0);

    let retry = TempDir::new().unwrap();
    let report = coordinator(&locks, &store, Arc::new(FakeTool::writing("repaired")), home.path())
        .with_force(true)
        .apply(&scope(), retry.path())
        .await
        .unwrap();

    assert!(report.pushed);
    assert_eq!(store.put_count(), 1);
    assert_eq!(
        store.get(&scope()).await.unwrap(),
        Some(StateDocument::from("repaired"))
    );
    assert!(locks.get(&scope()).await.unwrap().is_none());
}

/// Local state moves to the remote store and back.
#[tokio::test]
async fn test_state_migration_round_trip() {
    let locks = MemoryLockBackend::new();
    let store = MemoryStateStore::new();
    let home = TempDir::new().unwrap();
    let slot = LocalStateSlot::in_dir(home.path());
    slot.write(&StateDocument::from("S")).await.unwrap();

    let coordinator = coordinator(&locks, &store, Arc::new(FakeTool::read_only()), home.path());

    coordinator.use_remote_state(&scope()).await.unwrap();
    assert!(slot.read().await.unwrap().is_none());
    assert_eq!(store.get(&scope()).await.unwrap(), Some(StateDocument::from("S")));

    // Idempotent once the local copy is gone.
    let report = coordinator.use_remote_state(&scope()).await.unwrap();
    assert!(!report.pushed);

    coordinator.use_local_state(&scope()).await.unwrap();
    assert_eq!(slot.read().await.unwrap(), Some(StateDocument::from("S")));
    assert_eq!(store.get(&scope()).await.unwrap(), Some(StateDocument::from("S")));
}

/// Many writers race for the same scope through the filesystem backend;
/// exactly one wins.
#[tokio::test]
async fn test_concurrent_acquires_have_one_winner() {
    let dir = TempDir::new().unwrap();
    let winners = Arc::new(AtomicU32::new(0));
    let losers = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let root = dir.path().to_path_buf();
            let winners = winners.clone();
            let losers = losers.clone();

            tokio::spawn(async move {
                let lock = BackendLock::new(FsLockBackend::new(root), Duration::ZERO);
                match lock.acquire(&scope(), "apply").await {
                    Ok(_) => winners.fetch_add(1, Ordering::SeqCst),
                    Err(e) => {
                        assert!(e.is_contention(), "unexpected error: {e}");
                        losers.fetch_add(1, Ordering::SeqCst)
                    }
                };
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert_eq!(losers.load(Ordering::SeqCst), 7);
}

/// Scopes never contend with each other.
#[tokio::test]
async fn test_scopes_are_independent() {
    let backend = MemoryLockBackend::new();
    let lock = BackendLock::new(backend, Duration::ZERO);

    let network = lock.acquire(&scope(), "apply").await.unwrap();
    let compute = Scope::new("infra/compute").unwrap();
    let other = lock.acquire(&compute, "apply").await.unwrap();

    lock.release(&scope(), &network).await.unwrap();
    lock.release(&compute, &other).await.unwrap();
}
