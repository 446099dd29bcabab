//! Periodic re-drive of orders stuck in `Pending`.
//!
//! Every tick republishes the event of every pending order, regardless of
//! age. Consumer idempotency collapses the duplicates.

use crate::producer::OrderProducer;
use seckill_core::error::SeckillError;
use seckill_core::repository::OrderRepository;
use seckill_runtime::metrics::BackgroundMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Republishes order events for pending orders on a fixed interval.
#[derive(Clone)]
pub struct OrderReconciler {
    orders: Arc<dyn OrderRepository>,
    producer: OrderProducer,
    interval: Duration,
}

impl OrderReconciler {
    /// Reconciler sweeping every `interval`.
    #[must_use]
    pub fn new(orders: Arc<dyn OrderRepository>, producer: OrderProducer, interval: Duration) -> Self {
        Self {
            orders,
            producer,
            interval,
        }
    }

    /// One sweep. Returns how many events were republished.
    ///
    /// A failed publish is logged and the sweep moves on to the next order.
    ///
    /// # Errors
    ///
    /// [`SeckillError::Transient`] if pending orders cannot be listed.
    pub async fn sweep(&self) -> Result<usize, SeckillError> {
        let pending = self.orders.list_pending().await?;
        if pending.is_empty() {
            debug!("No pending orders to reconcile");
            return Ok(0);
        }

        let mut republished = 0;
        for order in &pending {
            match self.producer.publish_order(order).await {
                Ok(()) => republished += 1,
                Err(e) => warn!(order_serial = %order.serial, error = %e, "Failed to republish pending order"),
            }
        }

        BackgroundMetrics::record_sweep(republished);
        info!(pending = pending.len(), republished, "Pending orders re-driven");
        Ok(republished)
    }

    /// Sweep every interval until shutdown. The first sweep runs one
    /// interval after start.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval = ?self.interval, "Order reconciler started");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Order reconciler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }

        info!("Order reconciler stopped");
    }
}
