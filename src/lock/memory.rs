//! In-memory lock backend.
//!
//! Clones share the same table, so several [`BackendLock`](super::BackendLock)
//! instances built from clones behave like independent processes talking
//! to one store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Scope;
use crate::error::{LockError, Result};

use super::backend::{DeleteOutcome, LockBackend, PutOutcome};
use super::record::{LockRecord, LockToken};

/// In-memory lock backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockBackend {
    /// Records keyed by scope.
    records: Arc<Mutex<HashMap<Scope, LockRecord>>>,
    /// When set, every call fails as if the store were unreachable.
    unavailable: Arc<AtomicBool>,
}

impl MemoryLockBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fails if the backend has been marked unavailable.
    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LockError::unavailable("memory", "backend marked unavailable").into());
        }
        Ok(())
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn put_if_absent(&self, scope: &Scope, record: &LockRecord) -> Result<PutOutcome> {
        self.check_available()?;
        let mut records = self.records.lock().await;

        if records.contains_key(scope) {
            return Ok(PutOutcome::AlreadyExists);
        }

        records.insert(scope.clone(), record.clone());
        Ok(PutOutcome::Created)
    }

    async fn put_unconditional(&self, scope: &Scope, record: &LockRecord) -> Result<()> {
        self.check_available()?;
        let previous = self.records.lock().await.insert(scope.clone(), record.clone());

        if let Some(previous) = previous {
            debug!("Replaced lock record for {scope} held by {}", previous.holder);
        }
        Ok(())
    }

    async fn delete_if_matches(&self, scope: &Scope, token: &LockToken) -> Result<DeleteOutcome> {
        self.check_available()?;
        let mut records = self.records.lock().await;

        match records.get(scope) {
            Some(existing) if existing.token == *token => {
                records.remove(scope);
                Ok(DeleteOutcome::Deleted)
            }
            _ => Ok(DeleteOutcome::Mismatch),
        }
    }

    async fn get(&self, scope: &Scope) -> Result<Option<LockRecord>> {
        self.check_available()?;
        Ok(self.records.lock().await.get(scope).cloned())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn scope() -> Scope {
        Scope::new("infra/network").expect("valid scope")
    }

    #[tokio::test]
    async fn test_put_if_absent_is_exclusive() {
        let backend = MemoryLockBackend::new();
        let first = LockRecord::new(&scope(), "a", "apply");
        let second = LockRecord::new(&scope(), "b", "apply");

        assert_eq!(assert_ok!(backend.put_if_absent(&scope(), &first).await), PutOutcome::Created);
        assert_eq!(
            assert_ok!(backend.put_if_absent(&scope(), &second).await),
            PutOutcome::AlreadyExists
        );

        let stored = assert_ok!(backend.get(&scope()).await).expect("record present");
        assert_eq!(stored.token, first.token);
    }

    #[tokio::test]
    async fn test_delete_requires_matching_token() {
        let backend = MemoryLockBackend::new();
        let record = LockRecord::new(&scope(), "a", "apply");
        assert_ok!(backend.put_if_absent(&scope(), &record).await);

        let outcome = assert_ok!(backend.delete_if_matches(&scope(), &LockToken::generate()).await);
        assert_eq!(outcome, DeleteOutcome::Mismatch);
        assert!(assert_ok!(backend.get(&scope()).await).is_some());

        let outcome = assert_ok!(backend.delete_if_matches(&scope(), &record.token).await);
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert!(assert_ok!(backend.get(&scope()).await).is_none());
    }

    #[tokio::test]
    async fn test_clones_share_records() {
        let backend = MemoryLockBackend::new();
        let other = backend.clone();
        let record = LockRecord::new(&scope(), "a", "apply");

        assert_ok!(backend.put_if_absent(&scope(), &record).await);
        assert!(assert_ok!(other.get(&scope()).await).is_some());
    }

    #[tokio::test]
    async fn test_unavailable_backend_errors() {
        let backend = MemoryLockBackend::new();
        backend.set_unavailable(true);

        let record = LockRecord::new(&scope(), "a", "apply");
        assert_err!(backend.put_if_absent(&scope(), &record).await);

        backend.set_unavailable(false);
        assert_ok!(backend.put_if_absent(&scope(), &record).await);
    }
}
