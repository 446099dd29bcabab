//! Best-effort copy of cache stock counters into the durable mirror.
//!
//! Admission enqueues an activity id after each successful deduction. The
//! flusher reads the live counter and writes it to the activity row. Nothing
//! is retried: a failed or dropped flush leaves the mirror stale until the
//! next deduction for that activity.

use seckill_core::repository::ActivityRepository;
use seckill_core::stock::StockStore;
use seckill_core::types::ActivityId;
use seckill_runtime::metrics::BackgroundMetrics;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Sending side of the flush queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct StockFlushHandle {
    tx: mpsc::Sender<ActivityId>,
}

impl StockFlushHandle {
    /// Queue a flush for `activity`. Never waits; a full or closed queue
    /// drops the request.
    pub fn request(&self, activity: ActivityId) {
        if let Err(e) = self.tx.try_send(activity) {
            BackgroundMetrics::record_flush_error();
            warn!(activity_id = %activity, error = %e, "Stock flush dropped");
        }
    }
}

/// Background task draining the flush queue.
pub struct StockFlusher {
    rx: mpsc::Receiver<ActivityId>,
    stock: Arc<dyn StockStore>,
    activities: Arc<dyn ActivityRepository>,
}

impl StockFlusher {
    /// Create the flusher and its handle with room for `capacity` pending flushes.
    #[must_use]
    pub fn new(
        capacity: usize,
        stock: Arc<dyn StockStore>,
        activities: Arc<dyn ActivityRepository>,
    ) -> (Self, StockFlushHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                rx,
                stock,
                activities,
            },
            StockFlushHandle { tx },
        )
    }

    /// Drain the queue until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Stock flusher started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Stock flusher received shutdown signal");
                    break;
                }
                next = self.rx.recv() => match next {
                    Some(activity) => self.flush(activity).await,
                    None => break,
                },
            }
        }

        info!("Stock flusher stopped");
    }

    /// Copy the current counter of `activity` into the repository.
    pub async fn flush(&self, activity: ActivityId) {
        let current = match self.stock.peek_stock(activity).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!(activity_id = %activity, "No stock counter to flush");
                return;
            }
            Err(e) => {
                BackgroundMetrics::record_flush_error();
                warn!(activity_id = %activity, error = %e, "Failed to read stock for flush");
                return;
            }
        };

        match self.activities.update_available_stock(activity, current).await {
            Ok(()) => {
                BackgroundMetrics::record_flush();
                debug!(activity_id = %activity, stock = current, "Stock flushed");
            }
            Err(e) => {
                BackgroundMetrics::record_flush_error();
                warn!(activity_id = %activity, error = %e, "Failed to flush stock");
            }
        }
    }
}
