//! In-memory durable-tier ports.

use futures::future::BoxFuture;
use seckill_core::error::RepositoryError;
use seckill_core::repository::{ActivityRepository, OrderRepository};
use seckill_core::types::{
    Activity, ActivityId, NewActivity, NewOrder, Order, OrderId, OrderSerial, OrderStatus, UserId,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn check(down: &AtomicBool) -> Result<(), RepositoryError> {
    if down.load(Ordering::SeqCst) {
        Err(RepositoryError::ConnectionFailed("simulated outage".to_string()))
    } else {
        Ok(())
    }
}

/// In-memory [`ActivityRepository`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryActivityRepository {
    rows: Arc<Mutex<BTreeMap<i64, Activity>>>,
    down: Arc<AtomicBool>,
}

impl InMemoryActivityRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the database going away (or coming back).
    pub fn set_unavailable(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Insert a fully formed activity, keeping its id.
    pub fn insert(&self, activity: Activity) {
        self.rows.lock().unwrap().insert(activity.id.get(), activity);
    }
}

impl ActivityRepository for InMemoryActivityRepository {
    fn create(&self, activity: NewActivity) -> BoxFuture<'_, Result<Activity, RepositoryError>> {
        Box::pin(async move {
            check(&self.down)?;
            let mut rows = self.rows.lock().unwrap();
            let id = rows.keys().next_back().copied().unwrap_or(0) + 1;
            let created = Activity {
                id: ActivityId::new(id),
                name: activity.name,
                product_id: activity.product_id,
                seckill_price: activity.seckill_price,
                total_stock: activity.total_stock,
                available_stock: activity.total_stock,
                start_time: activity.start_time,
                end_time: activity.end_time,
                enabled: true,
            };
            rows.insert(id, created.clone());
            Ok(created)
        })
    }

    fn get(&self, id: ActivityId) -> BoxFuture<'_, Result<Option<Activity>, RepositoryError>> {
        Box::pin(async move {
            check(&self.down)?;
            Ok(self.rows.lock().unwrap().get(&id.get()).cloned())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<Activity>, RepositoryError>> {
        Box::pin(async move {
            check(&self.down)?;
            Ok(self.rows.lock().unwrap().values().rev().cloned().collect())
        })
    }

    fn update_available_stock(
        &self,
        id: ActivityId,
        stock: i64,
    ) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            check(&self.down)?;
            if let Some(row) = self.rows.lock().unwrap().get_mut(&id.get()) {
                row.available_stock = stock;
            }
            Ok(())
        })
    }

    fn set_enabled(
        &self,
        id: ActivityId,
        enabled: bool,
    ) -> BoxFuture<'_, Result<bool, RepositoryError>> {
        Box::pin(async move {
            check(&self.down)?;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get_mut(&id.get())
                .map(|row| row.enabled = enabled)
                .is_some())
        })
    }
}

/// In-memory [`OrderRepository`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryOrderRepository {
    rows: Arc<Mutex<Vec<Order>>>,
    down: Arc<AtomicBool>,
    create_delay: Arc<Mutex<Option<Duration>>>,
}

impl InMemoryOrderRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the database going away (or coming back).
    pub fn set_unavailable(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Make every `create` take `delay` before it stores the row.
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        *self.create_delay.lock().unwrap() = delay;
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Whether no orders are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored order, in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<Order> {
        self.rows.lock().unwrap().clone()
    }

    /// Overwrite an order's status unconditionally (external collaborator moves).
    pub fn force_status(&self, serial: &OrderSerial, status: OrderStatus) {
        if let Some(row) = self
            .rows
            .lock()
            .unwrap()
            .iter_mut()
            .find(|o| &o.serial == serial)
        {
            row.status = status;
        }
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn create(&self, order: NewOrder) -> BoxFuture<'_, Result<Order, RepositoryError>> {
        Box::pin(async move {
            let delay = *self.create_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            check(&self.down)?;
            let mut rows = self.rows.lock().unwrap();
            if rows.iter().any(|o| o.serial == order.serial) {
                return Err(RepositoryError::Duplicate(format!(
                    "order serial {}",
                    order.serial
                )));
            }
            let id = i64::try_from(rows.len()).unwrap_or(i64::MAX - 1) + 1;
            let created = Order {
                id: OrderId::new(id),
                amount: order.amount(),
                serial: order.serial,
                user_id: order.user_id,
                activity_id: order.activity_id,
                product_id: order.product_id,
                price: order.price,
                quantity: order.quantity,
                status: OrderStatus::Pending,
                created_at: order.created_at,
            };
            rows.push(created.clone());
            Ok(created)
        })
    }

    fn get_by_serial<'a>(
        &'a self,
        serial: &'a OrderSerial,
    ) -> BoxFuture<'a, Result<Option<Order>, RepositoryError>> {
        Box::pin(async move {
            check(&self.down)?;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|o| &o.serial == serial)
                .cloned())
        })
    }

    fn list_by_user(
        &self,
        user: UserId,
        status: Option<OrderStatus>,
    ) -> BoxFuture<'_, Result<Vec<Order>, RepositoryError>> {
        Box::pin(async move {
            check(&self.down)?;
            let mut orders: Vec<Order> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|o| o.user_id == user && status.is_none_or(|s| o.status == s))
                .cloned()
                .collect();
            orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(orders)
        })
    }

    fn list_pending(&self) -> BoxFuture<'_, Result<Vec<Order>, RepositoryError>> {
        Box::pin(async move {
            check(&self.down)?;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|o| o.status == OrderStatus::Pending)
                .cloned()
                .collect())
        })
    }

    fn transition_status<'a>(
        &'a self,
        serial: &'a OrderSerial,
        from: OrderStatus,
        to: OrderStatus,
    ) -> BoxFuture<'a, Result<bool, RepositoryError>> {
        Box::pin(async move {
            check(&self.down)?;
            let mut rows = self.rows.lock().unwrap();
            match rows.iter_mut().find(|o| &o.serial == serial) {
                Some(row) if row.status == from => {
                    row.status = to;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}
