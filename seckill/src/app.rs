//! Wiring of ports into services.

use crate::activity::ActivityService;
use crate::admission::Admission;
use crate::config::SeckillConfig;
use crate::consumer::{OrderConsumer, OrderMessageHandler, resubscribe_policy};
use crate::flusher::StockFlusher;
use crate::order::OrderCoordinator;
use crate::producer::OrderProducer;
use crate::reconciler::OrderReconciler;
use crate::supervisor::Supervisor;
use seckill_core::broker::MessageBroker;
use seckill_core::cache::ActivityCache;
use seckill_core::environment::Clock;
use seckill_core::ledger::ParticipationLedger;
use seckill_core::lock::DistributedLock;
use seckill_core::repository::{ActivityRepository, OrderRepository};
use seckill_core::stock::StockStore;
use std::sync::Arc;
use std::time::Duration;

/// Every port the services depend on, constructed once at process start.
#[derive(Clone)]
pub struct Ports {
    /// Cache-resident stock counters
    pub stock: Arc<dyn StockStore>,
    /// Per-activity lock
    pub lock: Arc<dyn DistributedLock>,
    /// Participation records
    pub ledger: Arc<dyn ParticipationLedger>,
    /// Cached activity documents
    pub cache: Arc<dyn ActivityCache>,
    /// Durable activities
    pub activities: Arc<dyn ActivityRepository>,
    /// Durable orders
    pub orders: Arc<dyn OrderRepository>,
    /// Event broker
    pub broker: Arc<dyn MessageBroker>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// The request-facing services plus the background tasks they rely on.
pub struct Services {
    /// Activity operations
    pub activities: ActivityService,
    /// Order operations
    pub orders: OrderCoordinator,
    /// Pending-order re-drive
    pub reconciler: OrderReconciler,
    ports: Ports,
    topic: String,
    flusher: StockFlusher,
}

impl Services {
    /// Build the services over `ports`, publishing order events to `topic`.
    #[must_use]
    pub fn new(ports: Ports, config: &SeckillConfig, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        let (flusher, flush) = StockFlusher::new(
            config.flush_queue_capacity,
            Arc::clone(&ports.stock),
            Arc::clone(&ports.activities),
        );

        let admission = Admission::new(
            Arc::clone(&ports.stock),
            Arc::clone(&ports.lock),
            Arc::clone(&ports.ledger),
            Arc::clone(&ports.cache),
            Arc::clone(&ports.activities),
            Arc::clone(&ports.clock),
            flush,
            config.lock_ttl,
        );
        let producer = OrderProducer::new(Arc::clone(&ports.broker), topic.clone());

        Self {
            activities: ActivityService::new(
                admission.clone(),
                Arc::clone(&ports.activities),
                Arc::clone(&ports.cache),
                Arc::clone(&ports.stock),
            ),
            orders: OrderCoordinator::new(admission, Arc::clone(&ports.orders), producer.clone()),
            reconciler: OrderReconciler::new(
                Arc::clone(&ports.orders),
                producer,
                config.reconcile_interval,
            ),
            ports,
            topic,
            flusher,
        }
    }

    /// Spawn the order consumer, the reconciler and the stock flusher under
    /// `supervisor`. Returns the request-facing services.
    pub fn start(
        self,
        supervisor: &mut Supervisor,
        resubscribe_delay: Duration,
    ) -> (ActivityService, OrderCoordinator) {
        let consumer = OrderConsumer::new(
            "order-consumer",
            self.topic,
            Arc::clone(&self.ports.broker),
            Arc::new(OrderMessageHandler::new(Arc::clone(&self.ports.orders))),
            supervisor.subscribe(),
        )
        .with_retry_policy(resubscribe_policy(resubscribe_delay));
        supervisor.adopt("order-consumer", consumer.spawn());

        let reconciler_shutdown = supervisor.subscribe();
        supervisor.spawn("order-reconciler", self.reconciler.run(reconciler_shutdown));
        let flusher_shutdown = supervisor.subscribe();
        supervisor.spawn("stock-flusher", self.flusher.run(flusher_shutdown));

        (self.activities, self.orders)
    }
}
