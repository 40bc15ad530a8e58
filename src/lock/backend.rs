//! Lock backend trait definition.
//!
//! A lock backend is a key-value store keyed by scope that supports an
//! atomic create-if-absent and an atomic compare-and-delete. All mutual
//! exclusion comes from these two primitives; callers never coordinate
//! among themselves.

use async_trait::async_trait;

use crate::config::Scope;
use crate::error::Result;

use super::record::{LockRecord, LockToken};

/// Outcome of a conditional create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was created.
    Created,
    /// A record already exists for the scope; nothing was written.
    AlreadyExists,
}

/// Outcome of a conditional delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record held the given token and was removed.
    Deleted,
    /// No record, or a record with another token; nothing was removed.
    Mismatch,
}

/// Trait for lock storage backends.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Stores `record` only if no record exists for `scope`.
    async fn put_if_absent(&self, scope: &Scope, record: &LockRecord) -> Result<PutOutcome>;

    /// Stores `record`, replacing any existing record for `scope`.
    async fn put_unconditional(&self, scope: &Scope, record: &LockRecord) -> Result<()>;

    /// Removes the record for `scope` only if it holds `token`.
    async fn delete_if_matches(&self, scope: &Scope, token: &LockToken) -> Result<DeleteOutcome>;

    /// Reads the current record for `scope`, if any.
    async fn get(&self, scope: &Scope) -> Result<Option<LockRecord>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl LockBackend for Box<dyn LockBackend> {
    async fn put_if_absent(&self, scope: &Scope, record: &LockRecord) -> Result<PutOutcome> {
        (**self).put_if_absent(scope, record).await
    }

    async fn put_unconditional(&self, scope: &Scope, record: &LockRecord) -> Result<()> {
        (**self).put_unconditional(scope, record).await
    }

    async fn delete_if_matches(&self, scope: &Scope, token: &LockToken) -> Result<DeleteOutcome> {
        (**self).delete_if_matches(scope, token).await
    }

    async fn get(&self, scope: &Scope) -> Result<Option<LockRecord>> {
        (**self).get(scope).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
