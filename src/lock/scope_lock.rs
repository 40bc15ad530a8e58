//! Scope lock strategies.
//!
//! [`BackendLock`] arbitrates ownership through a [`LockBackend`]'s
//! conditional writes; [`NoopLock`] is the single-writer mode that never
//! coordinates. The coordinator only sees the [`ScopeLock`] trait, so the
//! choice between them is made once at construction.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Scope;
use crate::error::{LockError, Result};

use super::backend::{DeleteOutcome, LockBackend, PutOutcome};
use super::record::{LockRecord, LockToken, generate_holder_id};

/// Largest random delay added to each backoff step, in milliseconds.
const MAX_JITTER_MS: u64 = 100;

/// Mutual exclusion over a scope.
#[async_trait]
pub trait ScopeLock: Send + Sync {
    /// Acquires the scope, waiting up to the configured timeout for the
    /// current holder to release it.
    async fn acquire(&self, scope: &Scope, operation: &str) -> Result<LockToken>;

    /// Takes the scope regardless of the current holder, invalidating the
    /// previous token.
    async fn steal(&self, scope: &Scope, operation: &str) -> Result<LockToken>;

    /// Releases the scope if `token` still owns it. Releasing a lock that
    /// was stolen or already released is not an error.
    async fn release(&self, scope: &Scope, token: &LockToken) -> Result<()>;

    /// Returns the current holder's record, if any.
    async fn holder(&self, scope: &Scope) -> Result<Option<LockRecord>>;

    /// Gets a short name for the strategy and its backend.
    fn kind(&self) -> &'static str;
}

/// Exponential backoff between acquire attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failed attempt.
    pub base: Duration,
    /// Upper bound for a single delay (before jitter).
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Returns the delay that follows `current`.
    #[must_use]
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Cheap jitter from the clock's sub-second nanos.
fn jitter() -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::from(d.subsec_nanos()));
    Duration::from_millis(nanos % (MAX_JITTER_MS + 1))
}

/// Lock arbitrated by a [`LockBackend`].
#[derive(Debug)]
pub struct BackendLock<B> {
    /// Backend holding the records.
    backend: B,
    /// How long `acquire` waits for a busy scope.
    timeout: Duration,
    /// Delay policy between attempts.
    backoff: Backoff,
    /// Identity written into records.
    holder: String,
}

impl<B: LockBackend> BackendLock<B> {
    /// Creates a lock over `backend` with the given acquire timeout.
    #[must_use]
    pub fn new(backend: B, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            backoff: Backoff::default(),
            holder: generate_holder_id(),
        }
    }

    /// Overrides the backoff policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Overrides the holder identity.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Builds the contention error from the record that blocked us.
    async fn contention(&self, scope: &Scope) -> Result<LockError> {
        let current = self.backend.get(scope).await?;
        let (holder, since, operation) = current.map_or_else(
            || ("unknown".to_string(), "unknown".to_string(), "unknown".to_string()),
            |r| (r.holder, r.acquired_at.to_rfc3339(), r.operation),
        );

        Ok(LockError::Contention {
            scope: scope.to_string(),
            holder,
            since,
            operation,
        })
    }
}

#[async_trait]
impl<B: LockBackend> ScopeLock for BackendLock<B> {
    async fn acquire(&self, scope: &Scope, operation: &str) -> Result<LockToken> {
        // A timeout too large to represent means waiting indefinitely.
        let deadline = Instant::now().checked_add(self.timeout);
        let mut delay = self.backoff.base;
        let mut attempts = 0_u32;

        loop {
            attempts += 1;
            let record = LockRecord::new(scope, &self.holder, operation);

            match self.backend.put_if_absent(scope, &record).await? {
                PutOutcome::Created => {
                    info!("Acquired lock for {scope} ({} backend, attempt {attempts})", self.backend.backend_type());
                    return Ok(record.token);
                }
                PutOutcome::AlreadyExists => {
                    let now = Instant::now();
                    if deadline.is_some_and(|deadline| now >= deadline) {
                        let err = self.contention(scope).await?;
                        warn!("Giving up on lock for {scope} after {attempts} attempts: {err}");
                        return Err(err.into());
                    }

                    let step = delay + jitter();
                    let wait = deadline.map_or(step, |deadline| step.min(deadline - now));
                    debug!("Lock for {scope} is busy, retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                    delay = self.backoff.next(delay);
                }
            }
        }
    }

    async fn steal(&self, scope: &Scope, operation: &str) -> Result<LockToken> {
        if let Some(previous) = self.backend.get(scope).await.ok().flatten() {
            warn!(
                "Stealing lock for {scope} from {} (held since {}, operation: {})",
                previous.holder, previous.acquired_at, previous.operation
            );
        }

        let record = LockRecord::new(scope, &self.holder, operation);
        self.backend.put_unconditional(scope, &record).await?;
        info!("Stole lock for {scope}");
        Ok(record.token)
    }

    async fn release(&self, scope: &Scope, token: &LockToken) -> Result<()> {
        match self.backend.delete_if_matches(scope, token).await? {
            DeleteOutcome::Deleted => info!("Released lock for {scope}"),
            DeleteOutcome::Mismatch => {
                warn!("Lock for {scope} is no longer held by this token; leaving the current record in place");
            }
        }
        Ok(())
    }

    async fn holder(&self, scope: &Scope) -> Result<Option<LockRecord>> {
        self.backend.get(scope).await
    }

    fn kind(&self) -> &'static str {
        self.backend.backend_type()
    }
}

/// Lock that never coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLock;

#[async_trait]
impl ScopeLock for NoopLock {
    async fn acquire(&self, scope: &Scope, _operation: &str) -> Result<LockToken> {
        debug!("Locking disabled, not locking {scope}");
        Ok(LockToken::noop())
    }

    async fn steal(&self, scope: &Scope, operation: &str) -> Result<LockToken> {
        self.acquire(scope, operation).await
    }

    async fn release(&self, _scope: &Scope, _token: &LockToken) -> Result<()> {
        Ok(())
    }

    async fn holder(&self, _scope: &Scope) -> Result<Option<LockRecord>> {
        Ok(None)
    }

    fn kind(&self) -> &'static str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TerrascopeError;
    use crate::lock::MemoryLockBackend;
    use tokio_test::assert_ok;

    fn scope() -> Scope {
        Scope::new("infra/network").expect("valid scope")
    }

    fn fast_backoff() -> Backoff {
        Backoff {
            base: Duration::from_millis(5),
            max: Duration::from_millis(20),
        }
    }

    fn lock_over(backend: &MemoryLockBackend, timeout: Duration) -> BackendLock<MemoryLockBackend> {
        BackendLock::new(backend.clone(), timeout).with_backoff(fast_backoff())
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.next(Duration::from_millis(250)), Duration::from_millis(500));
        assert_eq!(backoff.next(Duration::from_secs(8)), Duration::from_secs(10));
        assert_eq!(backoff.next(Duration::from_secs(10)), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_is_bounded() {
        for _ in 0..50 {
            assert!(jitter() <= Duration::from_millis(MAX_JITTER_MS));
        }
    }

    #[tokio::test]
    async fn test_second_acquire_sees_contention() {
        let backend = MemoryLockBackend::new();
        let first = lock_over(&backend, Duration::ZERO).with_holder("alice@host:1");
        let second = lock_over(&backend, Duration::ZERO).with_holder("bob@host:2");

        let token = assert_ok!(first.acquire(&scope(), "apply").await);

        let err = second.acquire(&scope(), "plan").await.expect_err("contention");
        assert!(err.is_contention());
        match err {
            TerrascopeError::Lock(LockError::Contention { holder, operation, .. }) => {
                assert_eq!(holder, "alice@host:1");
                assert_eq!(operation, "apply");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_ok!(first.release(&scope(), &token).await);
        let again = assert_ok!(second.acquire(&scope(), "plan").await);
        assert_ne!(again, token);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let backend = MemoryLockBackend::new();
        let first = lock_over(&backend, Duration::ZERO);
        let second = lock_over(&backend, Duration::from_secs(5));

        let token = assert_ok!(first.acquire(&scope(), "apply").await);

        let release = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            first.release(&scope(), &token).await
        };
        let contended = scope();
        let (released, acquired) = tokio::join!(release, second.acquire(&contended, "apply"));

        assert_ok!(released);
        assert_ne!(assert_ok!(acquired), token);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let backend = MemoryLockBackend::new();
        let first = lock_over(&backend, Duration::ZERO);
        let patient = lock_over(&backend, Duration::from_secs(u64::MAX));

        let token = assert_ok!(patient.acquire(&scope(), "plan").await);
        assert_ok!(patient.release(&scope(), &token).await);

        let held = assert_ok!(first.acquire(&scope(), "apply").await);
        let release = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            first.release(&scope(), &held).await
        };
        let contended = scope();
        let (released, acquired) = tokio::join!(release, patient.acquire(&contended, "plan"));

        assert_ok!(released);
        assert_ne!(assert_ok!(acquired), held);
    }

    #[tokio::test]
    async fn test_acquire_gives_up_after_timeout() {
        let backend = MemoryLockBackend::new();
        let first = lock_over(&backend, Duration::ZERO);
        let second = lock_over(&backend, Duration::from_millis(60));

        assert_ok!(first.acquire(&scope(), "apply").await);

        let started = std::time::Instant::now();
        let err = second.acquire(&scope(), "apply").await.expect_err("contention");
        assert!(err.is_contention());
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_steal_invalidates_previous_token() {
        let backend = MemoryLockBackend::new();
        let lock = lock_over(&backend, Duration::ZERO);

        let original = assert_ok!(lock.acquire(&scope(), "apply").await);
        let stolen = assert_ok!(lock.steal(&scope(), "apply").await);
        assert_ne!(original, stolen);

        assert_ok!(lock.release(&scope(), &original).await);
        let current = assert_ok!(lock.holder(&scope()).await).expect("record");
        assert_eq!(current.token, stolen);

        assert_ok!(lock.release(&scope(), &stolen).await);
        assert!(assert_ok!(lock.holder(&scope()).await).is_none());
    }

    #[tokio::test]
    async fn test_unavailable_backend_is_not_contention() {
        let backend = MemoryLockBackend::new();
        backend.set_unavailable(true);
        let lock = lock_over(&backend, Duration::from_secs(1));

        let err = lock.acquire(&scope(), "apply").await.expect_err("unavailable");
        assert!(!err.is_contention());
        assert!(matches!(err, TerrascopeError::Lock(LockError::BackendUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let backend = MemoryLockBackend::new();
        let lock = lock_over(&backend, Duration::ZERO);
        let other = Scope::new("infra/dns").expect("valid scope");

        assert_ok!(lock.acquire(&scope(), "apply").await);
        assert_ok!(lock.acquire(&other, "apply").await);
    }

    #[tokio::test]
    async fn test_noop_lock() {
        let lock = NoopLock;
        let token = assert_ok!(lock.acquire(&scope(), "apply").await);
        assert!(token.is_noop());

        let again = assert_ok!(lock.acquire(&scope(), "apply").await);
        assert!(again.is_noop());

        assert_ok!(lock.release(&scope(), &token).await);
        assert!(assert_ok!(lock.holder(&scope()).await).is_none());
        assert_eq!(lock.kind(), "none");
    }
}
