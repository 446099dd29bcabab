//! Activity service: creation, lookup and direct stock deduction.

use crate::admission::{Admission, validate_purchase};
use crate::info::{ActivityInfo, ActivityList};
use seckill_core::cache::ActivityCache;
use seckill_core::context::RequestContext;
use seckill_core::error::SeckillError;
use seckill_core::repository::ActivityRepository;
use seckill_core::stock::StockStore;
use seckill_core::types::{ActivityId, ActivityStatus, NewActivity, UserId};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Activity operations.
#[derive(Clone)]
pub struct ActivityService {
    admission: Admission,
    activities: Arc<dyn ActivityRepository>,
    cache: Arc<dyn ActivityCache>,
    stock: Arc<dyn StockStore>,
}

impl ActivityService {
    /// Build the service.
    #[must_use]
    pub fn new(
        admission: Admission,
        activities: Arc<dyn ActivityRepository>,
        cache: Arc<dyn ActivityCache>,
        stock: Arc<dyn StockStore>,
    ) -> Self {
        Self {
            admission,
            activities,
            cache,
            stock,
        }
    }

    /// Create an activity, cache it and warm its stock counter.
    ///
    /// Cache write and warm-up are best-effort: the activity exists once
    /// the repository accepts it.
    ///
    /// # Errors
    ///
    /// [`SeckillError::Validation`] for a malformed request,
    /// [`SeckillError::Transient`] if the repository fails.
    pub async fn create_activity(
        &self,
        ctx: &RequestContext,
        request: NewActivity,
    ) -> Result<ActivityId, SeckillError> {
        request.validate()?;
        let activity = ctx.run(self.activities.create(request)).await?;

        if let Err(e) = ctx.run(self.cache.put(&activity)).await {
            warn!(activity_id = %activity.id, error = %e, "Failed to cache new activity");
        }

        match ctx
            .run(self.stock.init_stock(activity.id, activity.available_stock))
            .await
        {
            Ok(in_effect) => {
                info!(activity_id = %activity.id, stock = in_effect, "Activity created");
            }
            Err(e) => {
                error!(activity_id = %activity.id, error = %e, "Failed to warm stock counter");
            }
        }

        Ok(activity.id)
    }

    /// Load an activity with its live stock.
    ///
    /// # Errors
    ///
    /// [`SeckillError::NotFound`] if it does not exist,
    /// [`SeckillError::Transient`] if the repository fails.
    pub async fn get_activity(
        &self,
        ctx: &RequestContext,
        id: ActivityId,
    ) -> Result<ActivityInfo, SeckillError> {
        if !id.is_valid() {
            return Err(SeckillError::Validation("activity id must be positive".into()));
        }
        let mut activity = self.admission.load_activity(ctx, id).await?;

        match ctx.run(self.stock.peek_stock(id)).await {
            Ok(Some(live)) => activity.available_stock = live,
            Ok(None) => {}
            Err(e) => warn!(activity_id = %id, error = %e, "Live stock unavailable, using mirror"),
        }

        Ok(ActivityInfo::new(&activity, self.admission.clock().now()))
    }

    /// Activities newest first, optionally only those in `status`.
    ///
    /// # Errors
    ///
    /// [`SeckillError::Transient`] if the repository fails.
    pub async fn list_activities(
        &self,
        ctx: &RequestContext,
        status: Option<ActivityStatus>,
    ) -> Result<ActivityList, SeckillError> {
        let now = self.admission.clock().now();
        let activities: Vec<ActivityInfo> = ctx
            .run(self.activities.list())
            .await?
            .iter()
            .map(|a| ActivityInfo::new(a, now))
            .filter(|a| status.is_none_or(|s| a.status == s))
            .collect();

        Ok(ActivityList {
            total: activities.len(),
            activities,
        })
    }

    /// Deduct `count` units for `user` under the activity lock.
    ///
    /// # Errors
    ///
    /// [`SeckillError::LockBusy`] if the lock is held,
    /// [`SeckillError::Conflict`] for business rejections, plus the errors of
    /// [`Admission::admit`].
    pub async fn deduct_stock(
        &self,
        ctx: &RequestContext,
        activity: ActivityId,
        user: UserId,
        count: i64,
    ) -> Result<bool, SeckillError> {
        validate_purchase(user, activity, count)?;

        let held = self.admission.acquire(ctx, activity).await?;
        let admitted = self.admission.admit(ctx, &held, user, activity, count).await;
        self.admission.release(held).await;

        admitted.map(|_| true)
    }

    /// Toggle the availability flag and refresh the cached copy.
    ///
    /// # Errors
    ///
    /// [`SeckillError::NotFound`] if the activity does not exist,
    /// [`SeckillError::Transient`] if the repository fails.
    pub async fn set_enabled(
        &self,
        ctx: &RequestContext,
        id: ActivityId,
        enabled: bool,
    ) -> Result<(), SeckillError> {
        if !ctx.run(self.activities.set_enabled(id, enabled)).await? {
            return Err(SeckillError::NotFound(format!("activity {id}")));
        }
        info!(activity_id = %id, enabled, "Activity availability changed");

        let refreshed = ctx.run(self.activities.get(id)).await?;
        if let Some(activity) = refreshed {
            if let Err(e) = ctx.run(self.cache.put(&activity)).await {
                error!(activity_id = %id, error = %e, "Failed to refresh cached activity");
            }
        }
        Ok(())
    }
}
