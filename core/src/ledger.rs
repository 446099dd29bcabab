//! Participation ledger: who already bought in which activity.

use crate::error::StoreError;
use crate::types::{ActivityId, UserId};
use futures::future::BoxFuture;

/// Bounded-lifetime record of `(user, activity)` purchases.
///
/// The check, the deduction and the write are separate calls. They are made
/// atomic by the enclosing per-activity lock, not by the ledger.
pub trait ParticipationLedger: Send + Sync {
    /// Record the pair unless already present. Returns `true` if newly written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache is unreachable.
    fn record_join(
        &self,
        user: UserId,
        activity: ActivityId,
    ) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Whether the pair is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache is unreachable.
    fn is_joined(
        &self,
        user: UserId,
        activity: ActivityId,
    ) -> BoxFuture<'_, Result<bool, StoreError>>;
}
