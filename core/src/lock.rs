//! Advisory, TTL-bounded distributed lock.

use crate::error::StoreError;
use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Opaque owner token proving who holds a lock.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Token value.
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

/// Non-blocking mutual exclusion keyed by string.
///
/// There is no lease renewal: work that outlives `ttl` silently loses
/// exclusivity while still running.
pub trait DistributedLock: Send + Sync {
    /// Try once to take the lock. `Some(token)` means this caller holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store is unreachable.
    fn acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<Option<LockToken>, StoreError>>;

    /// Release the lock only if `token` still owns it.
    ///
    /// Returns `false` when the lock expired or belongs to someone else.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store is unreachable.
    fn release(&self, key: &str, token: &LockToken) -> BoxFuture<'_, Result<bool, StoreError>>;
}
