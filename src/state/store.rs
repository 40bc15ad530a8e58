//! Remote state store trait definition.
//!
//! A remote store holds at most one state document per scope. It is the
//! durable, shared copy; writes replace the whole document.

use async_trait::async_trait;

use crate::config::Scope;
use crate::error::Result;

use super::document::StateDocument;

/// Trait for remote state storage backends.
#[async_trait]
pub trait RemoteStateStore: Send + Sync {
    /// Loads the document for `scope`.
    ///
    /// Returns `None` if no document has been stored yet.
    async fn get(&self, scope: &Scope) -> Result<Option<StateDocument>>;

    /// Stores `doc` as the document for `scope`.
    async fn put(&self, scope: &Scope, doc: &StateDocument) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl RemoteStateStore for Box<dyn RemoteStateStore> {
    async fn get(&self, scope: &Scope) -> Result<Option<StateDocument>> {
        (**self).get(scope).await
    }

    async fn put(&self, scope: &Scope, doc: &StateDocument) -> Result<()> {
        (**self).put(scope, doc).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
