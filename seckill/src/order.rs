//! Order coordination.
//!
//! A purchase runs entirely inside one hold of the activity lock:
//!
//! ```text
//! validate ─► acquire ─► admit (ledger, window, deduct) ─► persist Pending ─► publish ─► release
//! ```
//!
//! Persist and publish are not transactional with the deduction. A failed
//! or timed-out publish leaves the order `Pending` for the reconciler to
//! re-drive; a failed persist leaves the unit deducted with no order.
//!
//! Once stock is deducted the insert runs under [`PERSIST_TIMEOUT`] instead
//! of the caller's deadline, so a nearly expired request still records the
//! order it paid for.

use crate::admission::{Admission, HeldLock, validate_purchase};
use crate::info::{OrderInfo, OrderList};
use crate::producer::OrderProducer;
use seckill_core::context::RequestContext;
use seckill_core::error::SeckillError;
use seckill_core::repository::OrderRepository;
use seckill_core::types::{
    Activity, ActivityId, NewOrder, Order, OrderSerial, OrderStatus, UserId,
};
use seckill_runtime::metrics::OrderMetrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Units bought per order.
const ORDER_QUANTITY: i32 = 1;

/// Bound on the order insert after a successful deduction.
const PERSIST_TIMEOUT: Duration = Duration::from_secs(2);

/// Orchestrates purchases and serves order lookups.
#[derive(Clone)]
pub struct OrderCoordinator {
    admission: Admission,
    orders: Arc<dyn OrderRepository>,
    producer: OrderProducer,
}

impl OrderCoordinator {
    /// Build the coordinator.
    #[must_use]
    pub fn new(
        admission: Admission,
        orders: Arc<dyn OrderRepository>,
        producer: OrderProducer,
    ) -> Self {
        Self {
            admission,
            orders,
            producer,
        }
    }

    /// Buy one unit of `activity` for `user`.
    ///
    /// Returns the order in status [`OrderStatus::Pending`].
    ///
    /// # Errors
    ///
    /// [`SeckillError::Validation`] for malformed ids, [`SeckillError::LockBusy`]
    /// if another purchase holds the activity, [`SeckillError::Conflict`] for
    /// business rejections, [`SeckillError::NotFound`] for a missing activity,
    /// [`SeckillError::Transient`] for infrastructure failures.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        user: UserId,
        activity: ActivityId,
    ) -> Result<OrderInfo, SeckillError> {
        validate_purchase(user, activity, i64::from(ORDER_QUANTITY))?;

        let held = self.admission.acquire(ctx, activity).await?;
        let outcome = self.purchase(ctx, &held, user, activity).await;
        self.admission.release(held).await;

        outcome.map(|order| OrderInfo::from(&order))
    }

    async fn purchase(
        &self,
        ctx: &RequestContext,
        held: &HeldLock,
        user: UserId,
        activity_id: ActivityId,
    ) -> Result<Order, SeckillError> {
        let activity = self
            .admission
            .admit(ctx, held, user, activity_id, i64::from(ORDER_QUANTITY))
            .await?;

        let order = self.persist(user, &activity).await?;
        OrderMetrics::record_created();
        info!(
            order_serial = %order.serial,
            user_id = %user,
            activity_id = %activity_id,
            "Order created"
        );

        if let Err(e) = ctx.run(self.producer.publish_order(&order)).await {
            warn!(
                order_serial = %order.serial,
                error = %e,
                "Order event not published, left for reconciliation"
            );
        }
        Ok(order)
    }

    async fn persist(
        &self,
        user: UserId,
        activity: &Activity,
    ) -> Result<Order, SeckillError> {
        let new_order = NewOrder {
            serial: OrderSerial::generate(),
            user_id: user,
            activity_id: activity.id,
            product_id: activity.product_id,
            price: activity.seckill_price,
            quantity: ORDER_QUANTITY,
            created_at: self.admission.clock().now(),
        };

        let created = match tokio::time::timeout(PERSIST_TIMEOUT, self.orders.create(new_order)).await
        {
            Ok(result) => result.map_err(SeckillError::from),
            Err(_) => Err(SeckillError::deadline_exceeded()),
        };
        created.inspect_err(|e| {
            error!(
                user_id = %user,
                activity_id = %activity.id,
                error = %e,
                "Failed to persist order after stock deduction"
            );
        })
    }

    /// Look up one of `user`'s orders by serial.
    ///
    /// # Errors
    ///
    /// [`SeckillError::NotFound`] if the order does not exist or belongs to
    /// another user, [`SeckillError::Transient`] if the repository fails.
    pub async fn get_order(
        &self,
        ctx: &RequestContext,
        user: UserId,
        serial: &OrderSerial,
    ) -> Result<OrderInfo, SeckillError> {
        if serial.is_empty() {
            return Err(SeckillError::Validation("order serial must not be empty".into()));
        }

        match ctx.run(self.orders.get_by_serial(serial)).await? {
            Some(order) if order.user_id == user => Ok(OrderInfo::from(&order)),
            _ => Err(SeckillError::NotFound(format!("order {serial}"))),
        }
    }

    /// `user`'s orders newest first, optionally only those in `status`.
    ///
    /// # Errors
    ///
    /// [`SeckillError::Transient`] if the repository fails.
    pub async fn list_orders(
        &self,
        ctx: &RequestContext,
        user: UserId,
        status: Option<OrderStatus>,
    ) -> Result<OrderList, SeckillError> {
        if !user.is_valid() {
            return Err(SeckillError::Validation("user id must be positive".into()));
        }

        let orders: Vec<OrderInfo> = ctx
            .run(self.orders.list_by_user(user, status))
            .await?
            .iter()
            .map(OrderInfo::from)
            .collect();

        Ok(OrderList {
            total: orders.len(),
            orders,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::flusher::StockFlusher;
    use seckill_core::error::Rejection;
    use seckill_core::message::OrderMessage;
    use seckill_core::stock::StockStore;
    use seckill_core::types::{Money, ProductId};
    use seckill_testing::{
        InMemoryActivityCache, InMemoryActivityRepository, InMemoryBroker, InMemoryLedger,
        InMemoryLock, InMemoryOrderRepository, InMemoryStockStore, test_clock, test_time,
    };
    use std::time::Duration;

    const TOPIC: &str = "seckill.order";

    struct Fixture {
        coordinator: OrderCoordinator,
        stock: Arc<InMemoryStockStore>,
        lock: Arc<InMemoryLock>,
        orders: Arc<InMemoryOrderRepository>,
        broker: Arc<InMemoryBroker>,
        _flusher: StockFlusher,
    }

    fn fixture(stock_level: i64) -> Fixture {
        let stock = Arc::new(InMemoryStockStore::new());
        let lock = Arc::new(InMemoryLock::new());
        let repo = Arc::new(InMemoryActivityRepository::new());
        let orders = Arc::new(InMemoryOrderRepository::new());
        let broker = Arc::new(InMemoryBroker::new());
        let (flusher, flush) = StockFlusher::new(64, stock.clone(), repo.clone());

        repo.insert(Activity {
            id: ActivityId::new(1),
            name: "sale".to_string(),
            product_id: ProductId::new(3),
            seckill_price: Money::from_cents(1_500),
            total_stock: stock_level,
            available_stock: stock_level,
            start_time: test_time(),
            end_time: test_time() + chrono::Duration::hours(1),
            enabled: true,
        });
        stock.force_stock(ActivityId::new(1), stock_level);

        let admission = Admission::new(
            stock.clone(),
            lock.clone(),
            Arc::new(InMemoryLedger::default()),
            Arc::new(InMemoryActivityCache::new()),
            repo,
            Arc::new(test_clock()),
            flush,
            Duration::from_secs(1),
        );
        Fixture {
            coordinator: OrderCoordinator::new(
                admission,
                orders.clone(),
                OrderProducer::new(broker.clone(), TOPIC),
            ),
            stock,
            lock,
            orders,
            broker,
            _flusher: flusher,
        }
    }

    #[tokio::test]
    async fn create_order_persists_pending_and_publishes() {
        let f = fixture(5);
        let ctx = RequestContext::background();

        let info = f
            .coordinator
            .create_order(&ctx, UserId::new(8), ActivityId::new(1))
            .await
            .unwrap();

        assert_eq!(info.status, OrderStatus::Pending);
        assert_eq!(info.price, Money::from_cents(1_500));
        assert_eq!(info.amount, Money::from_cents(1_500));
        assert_eq!(info.quantity, 1);
        assert_eq!(info.create_time, test_time().timestamp());
        assert_eq!(f.orders.len(), 1);
        assert_eq!(f.stock.get_stock(ActivityId::new(1)).await.unwrap(), 4);
        assert!(!f.lock.is_held("lock:activity:lock:1"));

        let published = f.broker.published(TOPIC);
        assert_eq!(published.len(), 1);
        let message = OrderMessage::from_slice(&published[0]).unwrap();
        assert_eq!(message.order_serial, info.order_serial);
        assert_eq!(f.broker.published_keys(TOPIC), vec![info.order_serial.to_string()]);
    }

    #[tokio::test]
    async fn sold_out_creates_nothing() {
        let f = fixture(0);

        let err = f
            .coordinator
            .create_order(&RequestContext::background(), UserId::new(8), ActivityId::new(1))
            .await
            .unwrap_err();

        assert_eq!(err, SeckillError::Conflict(Rejection::InsufficientStock));
        assert!(f.orders.is_empty());
        assert!(f.broker.published(TOPIC).is_empty());
        assert!(!f.lock.is_held("lock:activity:lock:1"));
    }

    #[tokio::test]
    async fn second_order_by_same_user_is_rejected() {
        let f = fixture(5);
        let ctx = RequestContext::background();

        f.coordinator
            .create_order(&ctx, UserId::new(8), ActivityId::new(1))
            .await
            .unwrap();
        let err = f
            .coordinator
            .create_order(&ctx, UserId::new(8), ActivityId::new(1))
            .await
            .unwrap_err();

        assert_eq!(err, SeckillError::Conflict(Rejection::AlreadyParticipated));
        assert_eq!(f.orders.len(), 1);
    }

    #[tokio::test]
    async fn publish_failure_still_returns_pending_order() {
        let f = fixture(5);
        f.broker.set_publish_failing(true);

        let info = f
            .coordinator
            .create_order(&RequestContext::background(), UserId::new(8), ActivityId::new(1))
            .await
            .unwrap();

        assert_eq!(info.status, OrderStatus::Pending);
        assert_eq!(f.orders.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_broker_is_bounded_by_request_deadline() {
        let f = fixture(5);
        f.broker.set_publish_delay(Some(Duration::from_secs(10)));
        let ctx = RequestContext::with_timeout(Duration::from_millis(200));
        let started = tokio::time::Instant::now();

        let info = f
            .coordinator
            .create_order(&ctx, UserId::new(8), ActivityId::new(1))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(info.status, OrderStatus::Pending);
        assert_eq!(f.orders.len(), 1);
        assert!(f.broker.published(TOPIC).is_empty());
        assert!(!f.lock.is_held("lock:activity:lock:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_insert_outlives_request_deadline() {
        let f = fixture(5);
        f.orders.set_create_delay(Some(Duration::from_millis(300)));
        let ctx = RequestContext::with_timeout(Duration::from_millis(200));

        let info = f
            .coordinator
            .create_order(&ctx, UserId::new(8), ActivityId::new(1))
            .await
            .unwrap();

        assert_eq!(info.status, OrderStatus::Pending);
        assert_eq!(f.orders.len(), 1);
        assert_eq!(f.stock.get_stock(ActivityId::new(1)).await.unwrap(), 4);
        // The deadline has passed, so the event is left for the reconciler.
        assert!(f.broker.published(TOPIC).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_insert_times_out_as_transient() {
        let f = fixture(5);
        f.orders.set_create_delay(Some(Duration::from_secs(30)));

        let err = f
            .coordinator
            .create_order(&RequestContext::background(), UserId::new(8), ActivityId::new(1))
            .await
            .unwrap_err();

        assert_eq!(err, SeckillError::deadline_exceeded());
        assert!(f.orders.is_empty());
        assert!(!f.lock.is_held("lock:activity:lock:1"));
    }

    #[tokio::test]
    async fn persist_failure_is_transient_and_releases_lock() {
        let f = fixture(5);
        f.orders.set_unavailable(true);

        let err = f
            .coordinator
            .create_order(&RequestContext::background(), UserId::new(8), ActivityId::new(1))
            .await
            .unwrap_err();

        assert!(matches!(err, SeckillError::Transient(_)));
        assert!(f.broker.published(TOPIC).is_empty());
        assert!(!f.lock.is_held("lock:activity:lock:1"));
    }

    #[tokio::test]
    async fn busy_lock_is_reported() {
        let f = fixture(5);
        let ctx = RequestContext::background();
        let held = f
            .coordinator
            .admission
            .acquire(&ctx, ActivityId::new(1))
            .await
            .unwrap();

        let err = f
            .coordinator
            .create_order(&ctx, UserId::new(8), ActivityId::new(1))
            .await
            .unwrap_err();
        f.coordinator.admission.release(held).await;

        assert_eq!(err, SeckillError::LockBusy);
        assert_eq!(f.stock.get_stock(ActivityId::new(1)).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn get_order_hides_other_users_orders() {
        let f = fixture(5);
        let ctx = RequestContext::background();
        let info = f
            .coordinator
            .create_order(&ctx, UserId::new(8), ActivityId::new(1))
            .await
            .unwrap();

        let mine = f
            .coordinator
            .get_order(&ctx, UserId::new(8), &info.order_serial)
            .await
            .unwrap();
        assert_eq!(mine, info);

        let err = f
            .coordinator
            .get_order(&ctx, UserId::new(9), &info.order_serial)
            .await
            .unwrap_err();
        assert!(matches!(err, SeckillError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_orders_filters_by_status() {
        let f = fixture(5);
        let ctx = RequestContext::background();
        let info = f
            .coordinator
            .create_order(&ctx, UserId::new(8), ActivityId::new(1))
            .await
            .unwrap();

        let all = f.coordinator.list_orders(&ctx, UserId::new(8), None).await.unwrap();
        assert_eq!(all.total, 1);
        assert_eq!(all.orders[0].order_serial, info.order_serial);

        let created = f
            .coordinator
            .list_orders(&ctx, UserId::new(8), Some(OrderStatus::Created))
            .await
            .unwrap();
        assert_eq!(created.total, 0);
    }

    #[tokio::test]
    async fn invalid_ids_fail_fast() {
        let f = fixture(5);
        let err = f
            .coordinator
            .create_order(&RequestContext::background(), UserId::new(0), ActivityId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SeckillError::Validation(_)));
        assert!(!f.lock.is_held("lock:activity:lock:1"));
    }
}
