//! Response payloads returned by the service clients.

use chrono::{DateTime, Utc};
use seckill_core::types::{
    Activity, ActivityId, ActivityStatus, Money, Order, OrderId, OrderSerial, OrderStatus,
    ProductId, UserId,
};
use serde::{Deserialize, Serialize};

/// Activity as seen by callers: status derived at read time, stock taken from
/// the live counter when one exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInfo {
    /// Activity id
    pub id: ActivityId,
    /// Display name
    pub name: String,
    /// Product on sale
    pub product_id: ProductId,
    /// Sale price
    pub seckill_price: Money,
    /// Stock at creation
    pub total_stock: i64,
    /// Units left
    pub available_stock: i64,
    /// Window start, unix seconds
    pub start_time: i64,
    /// Window end, unix seconds
    pub end_time: i64,
    /// Status at read time
    pub status: ActivityStatus,
}

impl ActivityInfo {
    /// Project `activity` at `now`.
    #[must_use]
    pub fn new(activity: &Activity, now: DateTime<Utc>) -> Self {
        Self {
            id: activity.id,
            name: activity.name.clone(),
            product_id: activity.product_id,
            seckill_price: activity.seckill_price,
            total_stock: activity.total_stock,
            available_stock: activity.available_stock,
            start_time: activity.start_time.timestamp(),
            end_time: activity.end_time.timestamp(),
            status: activity.status(now),
        }
    }
}

/// Page of activities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityList {
    /// Activities, newest first
    pub activities: Vec<ActivityInfo>,
    /// Number of activities returned
    pub total: usize,
}

/// Order as seen by callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfo {
    /// Order id
    pub id: OrderId,
    /// Idempotency key
    pub order_serial: OrderSerial,
    /// Buyer
    pub user_id: UserId,
    /// Activity
    pub activity_id: ActivityId,
    /// Product
    pub product_id: ProductId,
    /// Total
    pub amount: Money,
    /// Unit price
    pub price: Money,
    /// Units
    pub quantity: i32,
    /// Current status
    pub status: OrderStatus,
    /// Creation time, unix seconds
    pub create_time: i64,
}

impl From<&Order> for OrderInfo {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            order_serial: order.serial.clone(),
            user_id: order.user_id,
            activity_id: order.activity_id,
            product_id: order.product_id,
            amount: order.amount,
            price: order.price,
            quantity: order.quantity,
            status: order.status,
            create_time: order.created_at.timestamp(),
        }
    }
}

/// A user's orders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderList {
    /// Orders, newest first
    pub orders: Vec<OrderInfo>,
    /// Number of orders returned
    pub total: usize,
}
