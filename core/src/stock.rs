//! Cache-resident inventory counter.

use crate::error::StoreError;
use crate::types::ActivityId;
use futures::future::BoxFuture;

/// Result of an atomic deduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeductOutcome {
    /// The counter was decremented.
    Deducted,
    /// The counter holds fewer units than requested; nothing changed.
    InsufficientStock,
    /// No counter exists for the activity; nothing changed.
    NotFound,
}

/// Atomic per-activity stock counter.
///
/// `deduct` must be a single atomic compare-and-decrement on the server. A
/// read followed by a separate write would let concurrent callers oversell.
pub trait StockStore: Send + Sync {
    /// Set the counter to `quantity` unless one already exists.
    ///
    /// Returns the value in effect afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache is unreachable.
    fn init_stock(
        &self,
        activity: ActivityId,
        quantity: i64,
    ) -> BoxFuture<'_, Result<i64, StoreError>>;

    /// Current count, reporting an absent counter as zero.
    ///
    /// Zero is therefore ambiguous between "sold out" and "never initialized";
    /// use [`StockStore::peek_stock`] to tell them apart.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache is unreachable.
    fn get_stock(&self, activity: ActivityId) -> BoxFuture<'_, Result<i64, StoreError>>;

    /// Current count, or `None` if no counter exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache is unreachable.
    fn peek_stock(&self, activity: ActivityId) -> BoxFuture<'_, Result<Option<i64>, StoreError>>;

    /// Atomically decrement by `count` if at least `count` units remain.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache is unreachable.
    fn deduct(
        &self,
        activity: ActivityId,
        count: i64,
    ) -> BoxFuture<'_, Result<DeductOutcome, StoreError>>;
}
