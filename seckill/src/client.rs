//! Capability interfaces per service boundary.
//!
//! Callers depend on [`ActivityClient`] and [`OrderClient`] rather than on
//! the concrete services, so a remote transport can stand in for the
//! in-process implementations below. Every method answers with the
//! `{code, msg, data}` envelope and never fails at the Rust level.

use crate::activity::ActivityService;
use crate::info::{ActivityInfo, ActivityList, OrderInfo, OrderList};
use crate::order::OrderCoordinator;
use async_trait::async_trait;
use seckill_core::context::RequestContext;
use seckill_core::error::SeckillError;
use seckill_core::response::Response;
use seckill_core::types::{
    ActivityId, ActivityStatus, NewActivity, OrderSerial, OrderStatus, UserId,
};
use tracing::warn;

/// Activity operations.
#[async_trait]
pub trait ActivityClient: Send + Sync {
    /// Create an activity; `data` is its id.
    async fn create_activity(&self, ctx: &RequestContext, request: NewActivity) -> Response<ActivityId>;

    /// Look up an activity with live stock.
    async fn get_activity(&self, ctx: &RequestContext, id: ActivityId) -> Response<ActivityInfo>;

    /// List activities, optionally by status.
    async fn list_activities(
        &self,
        ctx: &RequestContext,
        status: Option<ActivityStatus>,
    ) -> Response<ActivityList>;

    /// Deduct stock for a user; `data` is the success flag.
    async fn deduct_stock(
        &self,
        ctx: &RequestContext,
        activity: ActivityId,
        user: UserId,
        count: i64,
    ) -> Response<bool>;
}

/// Order operations.
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// Buy one unit; `data` is the pending order.
    async fn create_order(
        &self,
        ctx: &RequestContext,
        user: UserId,
        activity: ActivityId,
    ) -> Response<OrderInfo>;

    /// Look up one of the user's orders.
    async fn get_order(
        &self,
        ctx: &RequestContext,
        user: UserId,
        serial: &OrderSerial,
    ) -> Response<OrderInfo>;

    /// List the user's orders, optionally by status.
    async fn list_orders(
        &self,
        ctx: &RequestContext,
        user: UserId,
        status: Option<OrderStatus>,
    ) -> Response<OrderList>;
}

fn respond<T>(operation: &'static str, result: Result<T, SeckillError>, msg: &str) -> Response<T> {
    if let Err(e) = &result {
        if e.is_retryable() {
            warn!(operation, error = %e, "Request failed");
        }
    }
    Response::from_result(result, msg)
}

#[async_trait]
impl ActivityClient for ActivityService {
    async fn create_activity(&self, ctx: &RequestContext, request: NewActivity) -> Response<ActivityId> {
        respond(
            "create_activity",
            ActivityService::create_activity(self, ctx, request).await,
            "activity created",
        )
    }

    async fn get_activity(&self, ctx: &RequestContext, id: ActivityId) -> Response<ActivityInfo> {
        respond("get_activity", ActivityService::get_activity(self, ctx, id).await, "success")
    }

    async fn list_activities(
        &self,
        ctx: &RequestContext,
        status: Option<ActivityStatus>,
    ) -> Response<ActivityList> {
        respond(
            "list_activities",
            ActivityService::list_activities(self, ctx, status).await,
            "success",
        )
    }

    async fn deduct_stock(
        &self,
        ctx: &RequestContext,
        activity: ActivityId,
        user: UserId,
        count: i64,
    ) -> Response<bool> {
        respond(
            "deduct_stock",
            ActivityService::deduct_stock(self, ctx, activity, user, count).await,
            "stock deducted",
        )
    }
}

#[async_trait]
impl OrderClient for OrderCoordinator {
    async fn create_order(
        &self,
        ctx: &RequestContext,
        user: UserId,
        activity: ActivityId,
    ) -> Response<OrderInfo> {
        respond(
            "create_order",
            OrderCoordinator::create_order(self, ctx, user, activity).await,
            "order created",
        )
    }

    async fn get_order(
        &self,
        ctx: &RequestContext,
        user: UserId,
        serial: &OrderSerial,
    ) -> Response<OrderInfo> {
        respond("get_order", OrderCoordinator::get_order(self, ctx, user, serial).await, "success")
    }

    async fn list_orders(
        &self,
        ctx: &RequestContext,
        user: UserId,
        status: Option<OrderStatus>,
    ) -> Response<OrderList> {
        respond(
            "list_orders",
            OrderCoordinator::list_orders(self, ctx, user, status).await,
            "success",
        )
    }
}
