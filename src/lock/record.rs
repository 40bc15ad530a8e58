//! Lock records and tokens.
//!
//! A [`LockRecord`] is the persisted marker of ownership for one scope. The
//! [`LockToken`] inside it is the only proof of ownership a process holds;
//! it lives in memory and in the record, nowhere else.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Scope;

/// Token returned by the no-op lock.
pub const NOOP_TOKEN: &str = "noop";

/// Opaque proof of lock ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    /// Generates a fresh, unique token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the sentinel token handed out by the no-op lock.
    #[must_use]
    pub fn noop() -> Self {
        Self(NOOP_TOKEN.to_string())
    }

    /// Wraps a token supplied by an operator.
    #[must_use]
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns true if this is the no-op sentinel.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.0 == NOOP_TOKEN
    }

    /// Returns the token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted lock ownership marker for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Scope this record locks.
    pub scope: Scope,
    /// Token the holder must present to release.
    pub token: LockToken,
    /// Who holds the lock (`user@host:pid`).
    pub holder: String,
    /// Operation the holder is running.
    pub operation: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    /// Creates a record with a fresh token.
    #[must_use]
    pub fn new(scope: &Scope, holder: &str, operation: &str) -> Self {
        Self {
            scope: scope.clone(),
            token: LockToken::generate(),
            holder: holder.to_string(),
            operation: operation.to_string(),
            acquired_at: Utc::now(),
        }
    }

    /// Returns how long the lock has been held.
    #[must_use]
    pub fn held_for(&self) -> chrono::Duration {
        Utc::now() - self.acquired_at
    }
}

/// Generates a holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| String::from("unknown"));

    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    format!("{username}@{hostname}:{}", std::process::id())
}
