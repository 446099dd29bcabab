//! Participation records under `activity:join:user:{user}:{activity}`.

use crate::{command_failed, ttl_secs};
use futures::future::BoxFuture;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use seckill_core::error::StoreError;
use seckill_core::keys;
use seckill_core::ledger::ParticipationLedger;
use seckill_core::types::{ActivityId, UserId};
use std::time::Duration;

/// Redis-backed [`ParticipationLedger`].
#[derive(Clone)]
pub struct RedisParticipationLedger {
    conn_manager: ConnectionManager,
    ttl: Duration,
}

impl RedisParticipationLedger {
    /// Records expire after `ttl`.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager, ttl: Duration) -> Self {
        Self { conn_manager, ttl }
    }
}

impl ParticipationLedger for RedisParticipationLedger {
    fn record_join(
        &self,
        user: UserId,
        activity: ActivityId,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let reply: Option<String> = redis::cmd("SET")
                .arg(keys::user_join(user, activity))
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs(self.ttl))
                .query_async(&mut conn)
                .await
                .map_err(|e| command_failed("record_join", &e))?;

            tracing::debug!(user_id = %user, activity_id = %activity, new = reply.is_some(), "Participation recorded");
            Ok(reply.is_some())
        })
    }

    fn is_joined(
        &self,
        user: UserId,
        activity: ActivityId,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.exists::<_, bool>(keys::user_join(user, activity))
                .await
                .map_err(|e| command_failed("is_joined", &e))
        })
    }
}
