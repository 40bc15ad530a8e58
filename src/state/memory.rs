//! In-memory remote state store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::Scope;
use crate::error::{Result, StateError};

use super::document::StateDocument;
use super::store::RemoteStateStore;

/// In-memory state store.
///
/// Clones share the same documents and counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    /// Documents keyed by scope.
    documents: Arc<Mutex<HashMap<Scope, StateDocument>>>,
    /// Number of successful `put` calls.
    puts: Arc<AtomicUsize>,
    /// Fail every `get`.
    fail_reads: Arc<AtomicBool>,
    /// Fail every `put`.
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many documents have been written.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Makes every subsequent `get` fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent `put` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStateStore for MemoryStateStore {
    async fn get(&self, scope: &Scope) -> Result<Option<StateDocument>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StateError::read(scope.as_str(), "memory", "store marked unreadable").into());
        }
        Ok(self.documents.lock().await.get(scope).cloned())
    }

    async fn put(&self, scope: &Scope, doc: &StateDocument) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StateError::write(scope.as_str(), "memory", "store marked unwritable").into());
        }
        self.documents.lock().await.insert(scope.clone(), doc.clone());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStateStore::new();
        let scope = Scope::new("infra/network").expect("valid scope");

        assert!(assert_ok!(store.get(&scope).await).is_none());
        assert_ok!(store.put(&scope, &StateDocument::from("D")).await);
        assert_eq!(assert_ok!(store.get(&scope).await), Some(StateDocument::from("D")));
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let store = MemoryStateStore::new();
        let scope = Scope::new("infra/network").expect("valid scope");

        store.set_fail_writes(true);
        assert_err!(store.put(&scope, &StateDocument::from("D")).await);
        assert_eq!(store.put_count(), 0);

        store.set_fail_reads(true);
        assert_err!(store.get(&scope).await);
    }
}
