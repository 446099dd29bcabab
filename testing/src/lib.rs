//! # Seckill Testing
//!
//! In-memory implementations of every seckill port plus deterministic clocks.
//!
//! The in-memory ports honour the same contracts as the Redis, `PostgreSQL` and
//! Redpanda adapters (atomic deduction, compare-and-delete unlock, prefetch-one
//! delivery with requeue) so service logic can be exercised without
//! infrastructure. Each port can be switched into an unavailable mode to
//! simulate outages.
//!
//! ## Example
//!
//! ```
//! use seckill_core::stock::{DeductOutcome, StockStore};
//! use seckill_core::types::ActivityId;
//! use seckill_testing::InMemoryStockStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stock = InMemoryStockStore::new();
//! stock.init_stock(ActivityId::new(1), 1).await?;
//! assert_eq!(stock.deduct(ActivityId::new(1), 1).await?, DeductOutcome::Deducted);
//! assert_eq!(stock.deduct(ActivityId::new(1), 1).await?, DeductOutcome::InsufficientStock);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::unwrap_used)] // Poisoned test mutexes should fail loudly
#![allow(clippy::missing_panics_doc)]

pub mod broker;
pub mod repositories;
pub mod stores;

use chrono::{DateTime, Duration, Utc};
use seckill_core::environment::Clock;
use std::sync::Mutex;

/// Mock clocks.
pub mod mocks {
    use super::{Clock, DateTime, Duration, Mutex, Utc};

    /// Clock frozen at a fixed instant.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }

        /// Jump to an instant.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// 2025-01-01 00:00:00 UTC, the instant every test clock starts at.
    #[must_use]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Fixed clock at [`test_time`].
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; output is captured by the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seckill=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub use broker::InMemoryBroker;
pub use mocks::{FixedClock, ManualClock, test_clock, test_time};
pub use repositories::{InMemoryActivityRepository, InMemoryOrderRepository};
pub use stores::{InMemoryActivityCache, InMemoryLedger, InMemoryLock, InMemoryStockStore};
