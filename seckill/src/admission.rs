//! Stock admission under the per-activity lock.
//!
//! ```text
//! acquire(lock:activity:lock:{id})
//!     │
//!     ▼
//! ledger.is_joined ──► load activity ──► check window ──► stock.deduct
//!                                                              │
//!                                        ledger.record_join ◄──┘ (best-effort)
//!                                        flush request      ◄──  (best-effort)
//! ```
//!
//! The ledger check, the deduction and the ledger write are three separate
//! calls. The caller must hold the lock returned by [`Admission::acquire`]
//! for the whole of [`Admission::admit`].

use crate::flusher::StockFlushHandle;
use seckill_core::cache::ActivityCache;
use seckill_core::context::RequestContext;
use seckill_core::environment::Clock;
use seckill_core::error::{Rejection, SeckillError};
use seckill_core::keys;
use seckill_core::ledger::ParticipationLedger;
use seckill_core::lock::{DistributedLock, LockToken};
use seckill_core::repository::ActivityRepository;
use seckill_core::stock::{DeductOutcome, StockStore};
use seckill_core::types::{Activity, ActivityId, UserId};
use seckill_runtime::metrics::AdmissionMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Upper bound on a lock release, independent of the caller's deadline.
const RELEASE_TIMEOUT: Duration = Duration::from_millis(500);

/// Reject purchase requests that can never be admitted.
pub(crate) fn validate_purchase(
    user: UserId,
    activity: ActivityId,
    count: i64,
) -> Result<(), SeckillError> {
    if !user.is_valid() {
        return Err(SeckillError::Validation("user id must be positive".into()));
    }
    if !activity.is_valid() {
        return Err(SeckillError::Validation("activity id must be positive".into()));
    }
    if count <= 0 {
        return Err(SeckillError::Validation("count must be positive".into()));
    }
    Ok(())
}

/// Proof of holding an activity lock. Hand back to [`Admission::release`].
#[derive(Debug)]
#[must_use = "a held lock must be released"]
pub struct HeldLock {
    key: String,
    token: LockToken,
    acquired_at: Instant,
}

impl HeldLock {
    /// Lock key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Time since the lock was taken.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Cache-tier handles needed to admit a purchase.
#[derive(Clone)]
pub struct Admission {
    stock: Arc<dyn StockStore>,
    lock: Arc<dyn DistributedLock>,
    ledger: Arc<dyn ParticipationLedger>,
    cache: Arc<dyn ActivityCache>,
    activities: Arc<dyn ActivityRepository>,
    clock: Arc<dyn Clock>,
    flush: StockFlushHandle,
    lock_ttl: Duration,
}

impl Admission {
    /// Wire admission over the given ports.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stock: Arc<dyn StockStore>,
        lock: Arc<dyn DistributedLock>,
        ledger: Arc<dyn ParticipationLedger>,
        cache: Arc<dyn ActivityCache>,
        activities: Arc<dyn ActivityRepository>,
        clock: Arc<dyn Clock>,
        flush: StockFlushHandle,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            stock,
            lock,
            ledger,
            cache,
            activities,
            clock,
            flush,
            lock_ttl,
        }
    }

    /// Clock shared with the services built on top of admission.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Try once to take the lock of `activity`.
    ///
    /// # Errors
    ///
    /// [`SeckillError::LockBusy`] when another caller holds the lock,
    /// [`SeckillError::Transient`] when the lock store is unreachable or the
    /// deadline expires.
    pub async fn acquire(
        &self,
        ctx: &RequestContext,
        activity: ActivityId,
    ) -> Result<HeldLock, SeckillError> {
        let key = keys::activity_lock(activity);
        match ctx.run(self.lock.acquire(&key, self.lock_ttl)).await? {
            Some(token) => {
                debug!(lock = %key, "Lock acquired");
                Ok(HeldLock {
                    key,
                    token,
                    acquired_at: Instant::now(),
                })
            }
            None => {
                AdmissionMetrics::record_lock_busy();
                info!(activity_id = %activity, "Activity lock busy");
                Err(SeckillError::LockBusy)
            }
        }
    }

    /// Release a held lock. Failures are logged; the TTL reclaims the key.
    pub async fn release(&self, held: HeldLock) {
        match tokio::time::timeout(RELEASE_TIMEOUT, self.lock.release(&held.key, &held.token)).await
        {
            Ok(Ok(true)) => debug!(lock = %held.key, held_ms = held.held_for().as_millis(), "Lock released"),
            Ok(Ok(false)) => warn!(
                lock = %held.key,
                held_ms = held.held_for().as_millis(),
                "Lock expired before release"
            ),
            Ok(Err(e)) => error!(lock = %held.key, error = %e, "Failed to release lock"),
            Err(_) => error!(lock = %held.key, "Lock release timed out"),
        }
    }

    /// Load an activity, cache first, falling back to the repository and
    /// refilling the cache.
    ///
    /// # Errors
    ///
    /// [`SeckillError::NotFound`] if the activity does not exist,
    /// [`SeckillError::Transient`] if the repository fails.
    pub async fn load_activity(
        &self,
        ctx: &RequestContext,
        id: ActivityId,
    ) -> Result<Activity, SeckillError> {
        match ctx.run(self.cache.get(id)).await {
            Ok(Some(activity)) => return Ok(activity),
            Ok(None) => {}
            Err(e) => warn!(activity_id = %id, error = %e, "Activity cache read failed"),
        }

        let activity = ctx
            .run(self.activities.get(id))
            .await?
            .ok_or_else(|| SeckillError::NotFound(format!("activity {id}")))?;

        if let Err(e) = ctx.run(self.cache.put(&activity)).await {
            warn!(activity_id = %id, error = %e, "Activity cache refill failed");
        }
        Ok(activity)
    }

    /// Admit `user` for `count` units of `activity`. The caller holds `held`.
    ///
    /// Returns the activity the purchase was admitted under.
    ///
    /// # Errors
    ///
    /// [`SeckillError::Conflict`] for business rejections,
    /// [`SeckillError::NotFound`] for a missing activity or stock counter,
    /// [`SeckillError::Transient`] for infrastructure failures.
    #[tracing::instrument(skip(self, ctx, held), fields(lock = %held.key))]
    pub async fn admit(
        &self,
        ctx: &RequestContext,
        held: &HeldLock,
        user: UserId,
        activity: ActivityId,
        count: i64,
    ) -> Result<Activity, SeckillError> {
        let outcome = self.try_admit(ctx, user, activity, count).await;
        match &outcome {
            Ok(_) => AdmissionMetrics::record_admitted(held.held_for()),
            Err(SeckillError::Conflict(rejection)) => {
                AdmissionMetrics::record_rejected(rejection.label());
                info!(user_id = %user, activity_id = %activity, reason = rejection.label(), "Admission rejected");
            }
            Err(_) => {}
        }
        outcome
    }

    async fn try_admit(
        &self,
        ctx: &RequestContext,
        user: UserId,
        activity_id: ActivityId,
        count: i64,
    ) -> Result<Activity, SeckillError> {
        if ctx.run(self.ledger.is_joined(user, activity_id)).await? {
            return Err(Rejection::AlreadyParticipated.into());
        }

        let activity = self.load_activity(ctx, activity_id).await?;
        activity.check_open(self.clock.now())?;

        match ctx.run(self.stock.deduct(activity_id, count)).await? {
            DeductOutcome::Deducted => {}
            DeductOutcome::InsufficientStock => return Err(Rejection::InsufficientStock.into()),
            DeductOutcome::NotFound => {
                error!(activity_id = %activity_id, "Stock counter missing for activity");
                return Err(SeckillError::NotFound(format!(
                    "stock for activity {activity_id} is not initialized"
                )));
            }
        }
        debug!(user_id = %user, activity_id = %activity_id, count, "Stock deducted");

        match ctx.run(self.ledger.record_join(user, activity_id)).await {
            Ok(true) => {}
            Ok(false) => warn!(user_id = %user, activity_id = %activity_id, "Participation already recorded"),
            Err(e) => error!(user_id = %user, activity_id = %activity_id, error = %e, "Failed to record participation"),
        }

        self.flush.request(activity_id);
        Ok(activity)
    }
}
