//! Activity documents cached as JSON under `activity:info:{id}`.

use crate::{command_failed, ttl_secs};
use futures::future::BoxFuture;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use seckill_core::cache::ActivityCache;
use seckill_core::error::StoreError;
use seckill_core::keys;
use seckill_core::types::{Activity, ActivityId};
use std::time::Duration;

/// Redis-backed [`ActivityCache`].
#[derive(Clone)]
pub struct RedisActivityCache {
    conn_manager: ConnectionManager,
    ttl: Duration,
}

impl RedisActivityCache {
    /// Entries expire after `ttl`.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager, ttl: Duration) -> Self {
        Self { conn_manager, ttl }
    }
}

impl ActivityCache for RedisActivityCache {
    fn put<'a>(&'a self, activity: &'a Activity) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let body = serde_json::to_string(activity)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            let _: () = conn
                .set_ex(keys::activity_info(activity.id), body, ttl_secs(self.ttl))
                .await
                .map_err(|e| command_failed("put_activity", &e))?;

            tracing::debug!(activity_id = %activity.id, "Activity cached");
            Ok(())
        })
    }

    fn get(&self, id: ActivityId) -> BoxFuture<'_, Result<Option<Activity>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let body: Option<String> = conn
                .get(keys::activity_info(id))
                .await
                .map_err(|e| command_failed("get_activity", &e))?;

            body.map(|b| {
                serde_json::from_str(&b).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .transpose()
        })
    }
}
