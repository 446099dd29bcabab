//! Prometheus metrics for the seckill services.
//!
//! Components report through the recorder structs below rather than calling
//! the `metrics` macros directly, so metric names live in one place.
//!
//! # Example
//!
//! ```rust,no_run
//! use seckill_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Scrape http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the global recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Prometheus recorder with an HTTP scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the scrape listener.
    ///
    /// Must be called from within a Tokio runtime. A second installation in the
    /// same process is tolerated and leaves the first recorder in place.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                let addr = self.addr;
                tokio::spawn(async move {
                    // The exporter error implements neither Debug nor Display.
                    if exporter.await.is_err() {
                        tracing::error!(addr = %addr, "Metrics listener stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
                Ok(())
            }
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(msg))
                }
            }
        }
    }

    /// Handle for rendering, present once [`MetricsServer::start`] installed the recorder.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Admission
    describe_counter!(
        "seckill_admissions_total",
        "Purchase attempts that passed the lock and deducted stock"
    );
    describe_counter!(
        "seckill_admissions_rejected_total",
        "Purchase attempts rejected by a business rule, labelled by reason"
    );
    describe_counter!(
        "seckill_lock_busy_total",
        "Purchase attempts turned away because the activity lock was held"
    );
    describe_histogram!(
        "seckill_admission_duration_seconds",
        "Time spent holding the activity lock"
    );

    // Orders
    describe_counter!("seckill_orders_created_total", "Pending orders written");
    describe_counter!(
        "seckill_orders_confirmed_total",
        "Orders moved from pending to created by the consumer"
    );

    // Events
    describe_counter!("seckill_events_published_total", "Order events published");
    describe_counter!(
        "seckill_event_publish_errors_total",
        "Order events the broker did not accept"
    );
    describe_counter!(
        "seckill_consumer_settled_total",
        "Deliveries settled by the order consumer, labelled by outcome"
    );

    // Background work
    describe_counter!(
        "seckill_reconciler_republished_total",
        "Events republished for orders still pending"
    );
    describe_counter!("seckill_reconciler_sweeps_total", "Reconciler sweeps run");
    describe_counter!(
        "seckill_stock_flushes_total",
        "Stock values copied from the cache to the database"
    );
    describe_counter!(
        "seckill_stock_flush_errors_total",
        "Stock flushes that failed or were dropped"
    );

    // Retry
    describe_counter!("retry_attempts_total", "Retries scheduled after a failure");
    describe_counter!("retry_successes_total", "Operations that succeeded after retrying");
    describe_counter!("retry_exhausted_total", "Operations that ran out of retries");
}

/// Admission path metrics.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// A purchase deducted stock.
    pub fn record_admitted(held_for: Duration) {
        counter!("seckill_admissions_total").increment(1);
        histogram!("seckill_admission_duration_seconds").record(held_for.as_secs_f64());
    }

    /// A purchase was rejected; `reason` is a short static label.
    pub fn record_rejected(reason: &'static str) {
        counter!("seckill_admissions_rejected_total", "reason" => reason).increment(1);
    }

    /// The activity lock was held by someone else.
    pub fn record_lock_busy() {
        counter!("seckill_lock_busy_total").increment(1);
    }
}

/// Order lifecycle metrics.
pub struct OrderMetrics;

impl OrderMetrics {
    /// A pending order was written.
    pub fn record_created() {
        counter!("seckill_orders_created_total").increment(1);
    }

    /// An order moved from pending to created.
    pub fn record_confirmed() {
        counter!("seckill_orders_confirmed_total").increment(1);
    }
}

/// Order event metrics.
pub struct EventMetrics;

impl EventMetrics {
    /// An event was accepted by the broker.
    pub fn record_published() {
        counter!("seckill_events_published_total").increment(1);
    }

    /// The broker rejected an event.
    pub fn record_publish_error() {
        counter!("seckill_event_publish_errors_total").increment(1);
    }

    /// The consumer settled a delivery (`ack`, `requeue` or `discard`).
    pub fn record_settled(outcome: &'static str) {
        counter!("seckill_consumer_settled_total", "outcome" => outcome).increment(1);
    }
}

/// Background task metrics.
pub struct BackgroundMetrics;

impl BackgroundMetrics {
    /// One reconciler sweep finished, republishing `count` events.
    pub fn record_sweep(count: usize) {
        counter!("seckill_reconciler_sweeps_total").increment(1);
        counter!("seckill_reconciler_republished_total")
            .increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// A stock value was flushed.
    pub fn record_flush() {
        counter!("seckill_stock_flushes_total").increment(1);
    }

    /// A stock flush failed or was dropped.
    pub fn record_flush_error() {
        counter!("seckill_stock_flush_errors_total").increment(1);
    }
}

/// Retry metrics.
pub struct RetryMetrics;

impl RetryMetrics {
    /// A retry was scheduled.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// An operation succeeded after retrying.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// An operation ran out of retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}
