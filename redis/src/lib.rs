//! # Seckill Redis
//!
//! Redis implementations of the cache-tier ports:
//!
//! | Port | Type | Mechanism |
//! |------|------|-----------|
//! | `StockStore` | [`RedisStockStore`] | Lua compare-and-decrement on `activity:stock:{id}`, no expiry |
//! | `DistributedLock` | [`RedisLock`] | `SET NX PX` with a random token, Lua compare-and-delete |
//! | `ParticipationLedger` | [`RedisParticipationLedger`] | `SET NX EX` / `EXISTS` on `activity:join:user:{u}:{a}` |
//! | `ActivityCache` | [`RedisActivityCache`] | JSON under `activity:info:{id}` with TTL |
//!
//! All adapters share one [`ConnectionManager`], which multiplexes commands
//! from any number of tasks over a single reconnecting connection.
//!
//! # Example
//!
//! ```no_run
//! use seckill_redis::{RedisStockStore, connect};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = connect("redis://127.0.0.1:6379").await?;
//! let stock = RedisStockStore::new(conn);
//! # let _ = stock;
//! # Ok(())
//! # }
//! ```

mod cache;
mod ledger;
mod lock;
mod stock;

pub use cache::RedisActivityCache;
pub use ledger::RedisParticipationLedger;
pub use lock::RedisLock;
pub use redis::aio::ConnectionManager;
pub use stock::RedisStockStore;

use redis::Client;
use seckill_core::error::StoreError;

/// Open a managed connection to `redis_url`.
///
/// # Errors
///
/// Returns [`StoreError::ConnectionFailed`] if the URL is invalid or the server
/// is unreachable.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let client = Client::open(redis_url)
        .map_err(|e| StoreError::ConnectionFailed(format!("Failed to create Redis client: {e}")))?;

    let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
        StoreError::ConnectionFailed(format!("Failed to create Redis connection manager: {e}"))
    })?;

    tracing::info!("Connected to Redis");
    Ok(conn_manager)
}

/// Seconds for an `EX` argument, never below one.
pub(crate) fn ttl_secs(ttl: std::time::Duration) -> u64 {
    ttl.as_secs().max(1)
}

pub(crate) fn command_failed(command: &'static str, err: &redis::RedisError) -> StoreError {
    StoreError::CommandFailed {
        command,
        reason: err.to_string(),
    }
}
