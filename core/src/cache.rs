//! Read-through cache of activity documents.

use crate::error::StoreError;
use crate::types::{Activity, ActivityId};
use futures::future::BoxFuture;

/// Cache of [`Activity`] documents under `activity:info:{id}`.
pub trait ActivityCache: Send + Sync {
    /// Store an activity, replacing any cached copy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache is unreachable or encoding fails.
    fn put<'a>(&'a self, activity: &'a Activity) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Cached copy, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache is unreachable or the document is corrupt.
    fn get(&self, id: ActivityId) -> BoxFuture<'_, Result<Option<Activity>, StoreError>>;
}
