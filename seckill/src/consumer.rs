//! Order-event consumer with automatic resubscription.
//!
//! [`OrderConsumer`] runs the subscribe-process-resubscribe loop against the
//! broker and settles every delivery according to its handler's outcome:
//!
//! ```text
//! handler Ok                       ──► ack
//! handler Err, transient           ──► nack(requeue = true)
//! handler Err, permanent           ──► nack(requeue = false), logged
//! ```
//!
//! Delivery is at-least-once, so handlers must be idempotent.
//! [`OrderMessageHandler`] is: it only ever moves an order from `Pending`
//! to `Created` with a compare-and-set.

use async_trait::async_trait;
use futures::StreamExt;
use seckill_core::broker::{Delivery, DeliveryStream, MessageBroker};
use seckill_core::error::SeckillError;
use seckill_core::message::OrderMessage;
use seckill_core::repository::OrderRepository;
use seckill_core::types::{OrderSerial, OrderStatus};
use seckill_runtime::metrics::{EventMetrics, OrderMetrics};
use seckill_runtime::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Why a delivery could not be processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// The body is not a valid order event. Redelivery cannot help.
    #[error("malformed order event: {0}")]
    Malformed(String),

    /// The event names an order that was never persisted.
    #[error("order {0} does not exist")]
    MissingOrder(OrderSerial),

    /// Infrastructure failure; the delivery should be retried.
    #[error(transparent)]
    Transient(#[from] SeckillError),
}

impl HandleError {
    /// Whether the delivery should go back on the queue.
    #[must_use]
    pub const fn should_requeue(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Processes the body of one delivery.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Handle one message body.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`]; [`HandleError::should_requeue`] decides redelivery.
    async fn handle(&self, payload: &[u8]) -> Result<(), HandleError>;
}

/// Confirms orders: `Pending -> Created`, idempotently.
#[derive(Clone)]
pub struct OrderMessageHandler {
    orders: Arc<dyn OrderRepository>,
}

impl OrderMessageHandler {
    /// Handler over `orders`.
    #[must_use]
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl DeliveryHandler for OrderMessageHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandleError> {
        let message =
            OrderMessage::from_slice(payload).map_err(|e| HandleError::Malformed(e.to_string()))?;
        message
            .validate()
            .map_err(|e| HandleError::Malformed(e.to_string()))?;
        let serial = &message.order_serial;

        let order = self
            .orders
            .get_by_serial(serial)
            .await
            .map_err(SeckillError::from)?
            .ok_or_else(|| HandleError::MissingOrder(serial.clone()))?;

        if order.status != OrderStatus::Pending {
            debug!(order_serial = %serial, status = %order.status, "Order already advanced, skipping");
            return Ok(());
        }

        let moved = self
            .orders
            .transition_status(serial, OrderStatus::Pending, OrderStatus::Created)
            .await
            .map_err(SeckillError::from)?;

        if moved {
            OrderMetrics::record_confirmed();
            info!(order_serial = %serial, "Order confirmed");
        } else {
            debug!(order_serial = %serial, "Order advanced concurrently, skipping");
        }
        Ok(())
    }
}

/// Longest wait between resubscription attempts.
pub const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(60);

/// Backoff starting at `initial` and doubling up to [`MAX_RESUBSCRIBE_DELAY`]
/// (or `initial`, if that is longer).
#[must_use]
pub fn resubscribe_policy(initial: Duration) -> RetryPolicy {
    RetryPolicy::builder()
        .initial_delay(initial)
        .max_delay(initial.max(MAX_RESUBSCRIBE_DELAY))
        .build()
}

/// Broker consumer feeding a [`DeliveryHandler`].
pub struct OrderConsumer {
    name: String,
    topic: String,
    broker: Arc<dyn MessageBroker>,
    handler: Arc<dyn DeliveryHandler>,
    shutdown: broadcast::Receiver<()>,
    retry: RetryPolicy,
    failures: usize,
}

impl OrderConsumer {
    /// Consumer of `topic`, stopping when `shutdown` fires.
    ///
    /// Resubscribes with [`resubscribe_policy`] starting at 5 seconds when the
    /// stream ends or subscribing fails. The consumer never gives up;
    /// `max_retries` is ignored.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        broker: Arc<dyn MessageBroker>,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            broker,
            handler,
            shutdown,
            retry: resubscribe_policy(Duration::from_secs(5)),
            failures: 0,
        }
    }

    /// Set the resubscribe backoff.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Run the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Subscribe-process-resubscribe until shutdown.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, topic = %self.topic, "Order consumer started");

        loop {
            let broker = Arc::clone(&self.broker);
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Order consumer received shutdown signal");
                    break;
                }
                subscribed = broker.subscribe(&self.topic) => {
                    match subscribed {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, topic = %self.topic, "Subscribed to order events");
                            if self.process_stream(&mut stream).await {
                                break;
                            }
                            warn!(
                                consumer = %self.name,
                                "Order event stream ended, resubscribing in {:?}",
                                self.next_delay()
                            );
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to subscribe to order events, retrying in {:?}",
                                self.next_delay()
                            );
                        }
                    }
                    if self.wait_retry().await {
                        break;
                    }
                }
            }
        }

        info!(consumer = %self.name, "Order consumer stopped");
    }

    fn next_delay(&self) -> Duration {
        self.retry.delay_for_attempt(self.failures)
    }

    /// Back off before the next subscription. Returns `true` if shutdown
    /// arrived first.
    async fn wait_retry(&mut self) -> bool {
        let delay = self.next_delay();
        self.failures = self.failures.saturating_add(1);
        tokio::select! {
            _ = self.shutdown.recv() => true,
            () = tokio::time::sleep(delay) => false,
        }
    }

    /// Process deliveries until the stream ends (`false`) or shutdown (`true`).
    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Order consumer received shutdown signal during processing");
                    return true;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        self.failures = 0;
                        self.settle(delivery).await;
                    }
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Error receiving order event");
                    }
                    None => return false,
                },
            }
        }
    }

    async fn settle(&self, delivery: Delivery) {
        let redelivered = delivery.is_redelivered();
        match self.handler.handle(delivery.payload()).await {
            Ok(()) => {
                delivery.ack();
                EventMetrics::record_settled("ack");
            }
            Err(e) if e.should_requeue() => {
                warn!(
                    consumer = %self.name,
                    key = ?delivery.key(),
                    redelivered,
                    error = %e,
                    "Order event failed, requeueing"
                );
                delivery.nack(true);
                EventMetrics::record_settled("requeue");
            }
            Err(e) => {
                error!(
                    consumer = %self.name,
                    key = ?delivery.key(),
                    error = %e,
                    "Order event rejected permanently"
                );
                delivery.nack(false);
                EventMetrics::record_settled("discard");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use seckill_core::types::{ActivityId, Money, NewOrder, Order, ProductId, UserId};
    use seckill_testing::{InMemoryBroker, InMemoryOrderRepository, test_time};

    const TOPIC: &str = "seckill.order";

    async fn pending_order(orders: &InMemoryOrderRepository, serial: &str) -> Order {
        orders
            .create(NewOrder {
                serial: OrderSerial::new(serial),
                user_id: UserId::new(1),
                activity_id: ActivityId::new(1),
                product_id: ProductId::new(1),
                price: Money::from_cents(100),
                quantity: 1,
                created_at: test_time(),
            })
            .await
            .unwrap()
    }

    fn body(order: &Order) -> Vec<u8> {
        OrderMessage::from_order(order).to_bytes().unwrap()
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(condition(), "condition not reached");
    }

    #[tokio::test]
    async fn handler_confirms_pending_order_once() {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let order = pending_order(&orders, "s-1").await;
        let handler = OrderMessageHandler::new(orders.clone());

        handler.handle(&body(&order)).await.unwrap();
        handler.handle(&body(&order)).await.unwrap();

        let stored = orders.get_by_serial(&order.serial).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Created);
    }

    #[tokio::test]
    async fn handler_never_regresses_advanced_order() {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let order = pending_order(&orders, "s-1").await;
        orders.force_status(&order.serial, OrderStatus::Paid);

        OrderMessageHandler::new(orders.clone())
            .handle(&body(&order))
            .await
            .unwrap();

        let stored = orders.get_by_serial(&order.serial).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn handler_classifies_failures() {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let handler = OrderMessageHandler::new(orders.clone());

        let malformed = handler.handle(b"not json").await.unwrap_err();
        assert!(matches!(malformed, HandleError::Malformed(_)));
        assert!(!malformed.should_requeue());

        let ghost = pending_order(&InMemoryOrderRepository::new(), "ghost").await;
        let missing = handler.handle(&body(&ghost)).await.unwrap_err();
        assert_eq!(missing, HandleError::MissingOrder(OrderSerial::new("ghost")));
        assert!(!missing.should_requeue());

        let order = pending_order(&orders, "s-1").await;
        orders.set_unavailable(true);
        let transient = handler.handle(&body(&order)).await.unwrap_err();
        assert!(transient.should_requeue());
    }

    #[tokio::test]
    async fn consumer_acks_duplicates_and_discards_unknown_orders() {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let broker = Arc::new(InMemoryBroker::new());
        let order = pending_order(&orders, "s-1").await;
        let ghost = pending_order(&InMemoryOrderRepository::new(), "ghost").await;

        broker.publish(TOPIC, "s-1", body(&order)).await.unwrap();
        broker.publish(TOPIC, "s-1", body(&order)).await.unwrap();
        broker.publish(TOPIC, "ghost", body(&ghost)).await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = OrderConsumer::new(
            "orders",
            TOPIC,
            broker.clone(),
            Arc::new(OrderMessageHandler::new(orders.clone())),
            shutdown_rx,
        )
        .spawn();

        wait_for(|| broker.acked() == 2 && broker.discarded() == 1).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let stored = orders.get_by_serial(&order.serial).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Created);
        assert_eq!(broker.requeued(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn consumer_requeues_during_outage_then_confirms() {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let broker = Arc::new(InMemoryBroker::new());
        let order = pending_order(&orders, "s-1").await;
        orders.set_unavailable(true);
        broker.publish(TOPIC, "s-1", body(&order)).await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = OrderConsumer::new(
            "orders",
            TOPIC,
            broker.clone(),
            Arc::new(OrderMessageHandler::new(orders.clone())),
            shutdown_rx,
        )
        .spawn();

        wait_for(|| broker.requeued() >= 1).await;
        orders.set_unavailable(false);
        wait_for(|| broker.acked() == 1).await;

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let stored = orders.get_by_serial(&order.serial).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Created);
    }

    #[tokio::test]
    async fn consumer_stops_on_shutdown_while_idle() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = OrderConsumer::new(
            "orders",
            TOPIC,
            Arc::new(InMemoryBroker::new()),
            Arc::new(OrderMessageHandler::new(Arc::new(InMemoryOrderRepository::new()))),
            shutdown_rx,
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    /// Refuses every subscription, remembering when each was attempted.
    #[derive(Default)]
    struct RefusingBroker {
        attempts: std::sync::Mutex<Vec<tokio::time::Instant>>,
    }

    impl MessageBroker for RefusingBroker {
        fn publish(
            &self,
            _topic: &str,
            _key: &str,
            _payload: Vec<u8>,
        ) -> futures::future::BoxFuture<'_, Result<(), seckill_core::error::BrokerError>> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe(
            &self,
            topic: &str,
        ) -> futures::future::BoxFuture<'_, Result<DeliveryStream, seckill_core::error::BrokerError>>
        {
            self.attempts.lock().unwrap().push(tokio::time::Instant::now());
            let topic = topic.to_string();
            Box::pin(async move {
                Err(seckill_core::error::BrokerError::SubscriptionFailed {
                    topic,
                    reason: "refused".into(),
                })
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscriptions_back_off_exponentially() {
        let broker = Arc::new(RefusingBroker::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = OrderConsumer::new(
            "orders",
            TOPIC,
            broker.clone(),
            Arc::new(OrderMessageHandler::new(Arc::new(InMemoryOrderRepository::new()))),
            shutdown_rx,
        )
        .with_retry_policy(
            RetryPolicy::builder()
                .initial_delay(Duration::from_millis(100))
                .max_delay(Duration::from_millis(400))
                .build(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(1_650)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let attempts = broker.attempts.lock().unwrap().clone();
        let gaps: Vec<u128> = attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![100, 200, 400, 400, 400]);
    }

    #[test]
    fn resubscribe_policy_caps_growth() {
        let policy = resubscribe_policy(Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(10), MAX_RESUBSCRIBE_DELAY);

        let slow = resubscribe_policy(Duration::from_secs(90));
        assert_eq!(slow.delay_for_attempt(3), Duration::from_secs(90));
    }
}
