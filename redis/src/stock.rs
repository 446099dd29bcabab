//! Stock counters under `activity:stock:{id}`.

use crate::command_failed;
use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use seckill_core::error::StoreError;
use seckill_core::keys;
use seckill_core::stock::{DeductOutcome, StockStore};
use seckill_core::types::ActivityId;

/// Returns -1 when the counter is missing, 0 when it holds fewer than
/// ARGV[1] units, 1 after decrementing.
const DEDUCT_SCRIPT: &str = r"
local stock = redis.call('GET', KEYS[1])
if not stock then
    return -1
end
local count = tonumber(ARGV[1])
if tonumber(stock) < count then
    return 0
end
redis.call('DECRBY', KEYS[1], count)
return 1
";

/// Set-if-absent, then report whatever value is in effect. The counter never
/// expires; only `DEDUCT_SCRIPT` changes it afterwards.
const INIT_SCRIPT: &str = r"
redis.call('SET', KEYS[1], ARGV[1], 'NX')
return tonumber(redis.call('GET', KEYS[1]))
";

/// Redis-backed [`StockStore`].
#[derive(Clone)]
pub struct RedisStockStore {
    conn_manager: ConnectionManager,
    deduct: Script,
    init: Script,
}

impl RedisStockStore {
    /// Store over `conn_manager`.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            deduct: Script::new(DEDUCT_SCRIPT),
            init: Script::new(INIT_SCRIPT),
        }
    }
}

impl StockStore for RedisStockStore {
    fn init_stock(
        &self,
        activity: ActivityId,
        quantity: i64,
    ) -> BoxFuture<'_, Result<i64, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let effective: i64 = self
                .init
                .key(keys::activity_stock(activity))
                .arg(quantity)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| command_failed("init_stock", &e))?;

            tracing::info!(
                activity_id = %activity,
                requested = quantity,
                effective,
                "Stock initialized"
            );
            Ok(effective)
        })
    }

    fn get_stock(&self, activity: ActivityId) -> BoxFuture<'_, Result<i64, StoreError>> {
        Box::pin(async move { Ok(self.peek_stock(activity).await?.unwrap_or(0)) })
    }

    fn peek_stock(&self, activity: ActivityId) -> BoxFuture<'_, Result<Option<i64>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.get::<_, Option<i64>>(keys::activity_stock(activity))
                .await
                .map_err(|e| command_failed("get_stock", &e))
        })
    }

    fn deduct(
        &self,
        activity: ActivityId,
        count: i64,
    ) -> BoxFuture<'_, Result<DeductOutcome, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let code: i64 = self
                .deduct
                .key(keys::activity_stock(activity))
                .arg(count)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| command_failed("deduct_stock", &e))?;

            let outcome = match code {
                1 => DeductOutcome::Deducted,
                0 => DeductOutcome::InsufficientStock,
                -1 => DeductOutcome::NotFound,
                other => {
                    return Err(StoreError::UnexpectedReply(format!(
                        "deduct script returned {other}"
                    )));
                }
            };

            tracing::debug!(activity_id = %activity, count, outcome = ?outcome, "Deduct");
            Ok(outcome)
        })
    }
}
