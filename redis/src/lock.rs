//! Token-guarded lock on a single Redis key.

use crate::command_failed;
use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::Script;
use seckill_core::error::StoreError;
use seckill_core::lock::{DistributedLock, LockToken};
use std::time::Duration;

const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Redis-backed [`DistributedLock`].
///
/// `acquire` is `SET key token NX PX ttl`; `release` deletes the key only
/// while it still holds the caller's token.
#[derive(Clone)]
pub struct RedisLock {
    conn_manager: ConnectionManager,
    release: Script,
}

impl RedisLock {
    /// Lock client over a shared connection.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

impl DistributedLock for RedisLock {
    fn acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<Option<LockToken>, StoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let token = LockToken::generate();
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

            // NX answers nil when the key is taken.
            let reply: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(token.as_str())
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_failed("acquire_lock", &e))?;

            if reply.is_some() {
                tracing::debug!(key = %key, ttl_ms, "Lock acquired");
                Ok(Some(token))
            } else {
                tracing::debug!(key = %key, "Lock busy");
                Ok(None)
            }
        })
    }

    fn release(&self, key: &str, token: &LockToken) -> BoxFuture<'_, Result<bool, StoreError>> {
        let key = key.to_string();
        let token = token.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let deleted: i64 = self
                .release
                .key(&key)
                .arg(token.as_str())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| command_failed("release_lock", &e))?;

            if deleted == 1 {
                tracing::debug!(key = %key, "Lock released");
                Ok(true)
            } else {
                tracing::warn!(key = %key, "Lock no longer owned at release (expired or taken over)");
                Ok(false)
            }
        })
    }
}
