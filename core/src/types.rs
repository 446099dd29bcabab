//! Domain types for the seckill subsystem.
//!
//! Identifiers are transparent newtypes over the integer keys used by the
//! durable store. Prices are held in cents.

use crate::error::{Rejection, SeckillError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// The raw identifier.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }

            /// Identifiers are assigned from 1; zero and negatives are never valid.
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 > 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

integer_id!(
    /// Identifier of a seckill activity.
    ActivityId
);
integer_id!(
    /// Identifier of a user (owned by the external user service).
    UserId
);
integer_id!(
    /// Identifier of a product (owned by the external product catalogue).
    ProductId
);
integer_id!(
    /// Durable row identifier of an order.
    OrderId
);

/// Unique order serial, the idempotency key of an order and its event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderSerial(String);

impl OrderSerial {
    /// Generate a fresh serial (UUID v4, hyphenless).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing serial.
    #[must_use]
    pub fn new(serial: impl Into<String>) -> Self {
        Self(serial.into())
    }

    /// Borrow the serial as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the serial is blank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for OrderSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Money in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Create from a cent amount.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// The amount in cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Unit price times quantity, saturating on overflow.
    #[must_use]
    pub fn times(self, quantity: i32) -> Self {
        Self(self.0.saturating_mul(i64::from(quantity)))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

// ============================================================================
// Activity
// ============================================================================

/// Time-derived lifecycle of an activity over its `[start, end)` window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Current time is before the start.
    NotStarted,
    /// Current time lies within `[start, end)`.
    Active,
    /// Current time is at or after the end.
    Ended,
}

impl ActivityStatus {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    /// Parse the string form.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Validation`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, SeckillError> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            _ => Err(SeckillError::Validation(format!(
                "unknown activity status: {s}"
            ))),
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A seckill activity as stored durably.
///
/// `available_stock` is the durable mirror of the cache counter; the live
/// value lives in the stock store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity identity.
    pub id: ActivityId,
    /// Display name.
    pub name: String,
    /// Product being sold.
    pub product_id: ProductId,
    /// Unit price during the sale.
    pub seckill_price: Money,
    /// Stock the activity was created with.
    pub total_stock: i64,
    /// Durable mirror of the remaining stock.
    pub available_stock: i64,
    /// Start of the sale window (inclusive).
    pub start_time: DateTime<Utc>,
    /// End of the sale window (exclusive).
    pub end_time: DateTime<Utc>,
    /// Administrative availability flag.
    pub enabled: bool,
}

impl Activity {
    /// Status at `now`, derived from the sale window.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> ActivityStatus {
        if now < self.start_time {
            ActivityStatus::NotStarted
        } else if now >= self.end_time {
            ActivityStatus::Ended
        } else {
            ActivityStatus::Active
        }
    }

    /// Check whether a purchase may be admitted at `now`.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] explaining why the activity is closed.
    pub fn check_open(&self, now: DateTime<Utc>) -> Result<(), Rejection> {
        match self.status(now) {
            ActivityStatus::NotStarted => Err(Rejection::NotStarted),
            ActivityStatus::Ended => Err(Rejection::Ended),
            ActivityStatus::Active if !self.enabled => Err(Rejection::Unavailable),
            ActivityStatus::Active => Ok(()),
        }
    }
}

/// Input for creating an activity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewActivity {
    /// Display name.
    pub name: String,
    /// Product being sold.
    pub product_id: ProductId,
    /// Unit price during the sale.
    pub seckill_price: Money,
    /// Units on sale.
    pub total_stock: i64,
    /// Start of the sale window.
    pub start_time: DateTime<Utc>,
    /// End of the sale window.
    pub end_time: DateTime<Utc>,
}

impl NewActivity {
    /// Validate the creation request.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), SeckillError> {
        if self.name.trim().is_empty() {
            return Err(SeckillError::Validation("activity name must not be empty".into()));
        }
        if !self.product_id.is_valid() {
            return Err(SeckillError::Validation("product id must be positive".into()));
        }
        if self.seckill_price.cents() < 0 {
            return Err(SeckillError::Validation("seckill price must not be negative".into()));
        }
        if self.total_stock <= 0 {
            return Err(SeckillError::Validation("total stock must be positive".into()));
        }
        if self.end_time <= self.start_time {
            return Err(SeckillError::Validation("end time must be after start time".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Order
// ============================================================================

/// Order lifecycle.
///
/// `Pending` is the only initial state. The consumer performs the single
/// `Pending -> Created` transition; the remaining states belong to external
/// collaborators. Transitions never move an order back to `Pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Written by the coordinator, awaiting consumer confirmation.
    Pending,
    /// Confirmed by the consumer.
    Created,
    /// Paid by the buyer.
    Paid,
    /// Failed downstream.
    Failed,
    /// Cancelled by the buyer or an operator.
    Cancelled,
}

impl OrderStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Validation`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, SeckillError> {
        match s {
            "pending" => Ok(Self::Pending),
            "created" => Ok(Self::Created),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(SeckillError::Validation(format!("unknown order status: {s}"))),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable order record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Row identity.
    pub id: OrderId,
    /// Idempotency key.
    pub serial: OrderSerial,
    /// Buyer.
    pub user_id: UserId,
    /// Activity the order was admitted under.
    pub activity_id: ActivityId,
    /// Product bought.
    pub product_id: ProductId,
    /// `price * quantity`.
    pub amount: Money,
    /// Unit price.
    pub price: Money,
    /// Units bought.
    pub quantity: i32,
    /// Current status.
    pub status: OrderStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Input for persisting a new order. New orders are always `Pending`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrder {
    /// Idempotency key.
    pub serial: OrderSerial,
    /// Buyer.
    pub user_id: UserId,
    /// Activity.
    pub activity_id: ActivityId,
    /// Product.
    pub product_id: ProductId,
    /// Unit price.
    pub price: Money,
    /// Units.
    pub quantity: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Total amount of the order.
    #[must_use]
    pub fn amount(&self) -> Money {
        self.price.times(self.quantity)
    }
}
