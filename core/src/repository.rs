//! Durable records for activities and orders.

use crate::error::RepositoryError;
use crate::types::{
    Activity, ActivityId, NewActivity, NewOrder, Order, OrderSerial, OrderStatus, UserId,
};
use futures::future::BoxFuture;

/// Durable store of activities.
pub trait ActivityRepository: Send + Sync {
    /// Persist a new activity with `available_stock = total_stock` and the
    /// availability flag set.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the write fails.
    fn create(&self, activity: NewActivity) -> BoxFuture<'_, Result<Activity, RepositoryError>>;

    /// Load an activity.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the query fails.
    fn get(&self, id: ActivityId) -> BoxFuture<'_, Result<Option<Activity>, RepositoryError>>;

    /// All activities, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the query fails.
    fn list(&self) -> BoxFuture<'_, Result<Vec<Activity>, RepositoryError>>;

    /// Overwrite the durable stock mirror.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the write fails.
    fn update_available_stock(
        &self,
        id: ActivityId,
        stock: i64,
    ) -> BoxFuture<'_, Result<(), RepositoryError>>;

    /// Set the administrative availability flag. Returns `false` if the
    /// activity does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the write fails.
    fn set_enabled(
        &self,
        id: ActivityId,
        enabled: bool,
    ) -> BoxFuture<'_, Result<bool, RepositoryError>>;
}

/// Durable store of orders.
pub trait OrderRepository: Send + Sync {
    /// Persist a new order in status [`OrderStatus::Pending`].
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Duplicate`] if the serial already exists.
    fn create(&self, order: NewOrder) -> BoxFuture<'_, Result<Order, RepositoryError>>;

    /// Load an order by serial.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the query fails.
    fn get_by_serial<'a>(
        &'a self,
        serial: &'a OrderSerial,
    ) -> BoxFuture<'a, Result<Option<Order>, RepositoryError>>;

    /// A user's orders, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the query fails.
    fn list_by_user(
        &self,
        user: UserId,
        status: Option<OrderStatus>,
    ) -> BoxFuture<'_, Result<Vec<Order>, RepositoryError>>;

    /// Every order currently [`OrderStatus::Pending`], oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the query fails.
    fn list_pending(&self) -> BoxFuture<'_, Result<Vec<Order>, RepositoryError>>;

    /// Compare-and-set the status: move to `to` only if the order is
    /// currently `from`. Returns whether the row changed.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the write fails.
    fn transition_status<'a>(
        &'a self,
        serial: &'a OrderSerial,
        from: OrderStatus,
        to: OrderStatus,
    ) -> BoxFuture<'a, Result<bool, RepositoryError>>;
}
