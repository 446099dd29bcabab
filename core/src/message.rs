//! Order-creation event carried through the broker.
//!
//! The body is a JSON object keyed by the order serial:
//!
//! ```json
//! {"orderSerial":"…","userID":1,"activityID":2,"productID":3,"amount":1000,"price":500,"quantity":2}
//! ```

use crate::error::{BrokerError, SeckillError};
use crate::types::{ActivityId, Money, Order, OrderSerial, ProductId, UserId};
use serde::{Deserialize, Serialize};

/// Order-creation event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMessage {
    /// Idempotency key of the order.
    #[serde(rename = "orderSerial")]
    pub order_serial: OrderSerial,
    /// Buyer.
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Activity.
    #[serde(rename = "activityID")]
    pub activity_id: ActivityId,
    /// Product.
    #[serde(rename = "productID")]
    pub product_id: ProductId,
    /// Total amount in cents.
    pub amount: Money,
    /// Unit price in cents.
    pub price: Money,
    /// Units.
    pub quantity: i32,
}

impl OrderMessage {
    /// Build the event for an order.
    #[must_use]
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_serial: order.serial.clone(),
            user_id: order.user_id,
            activity_id: order.activity_id,
            product_id: order.product_id,
            amount: order.amount,
            price: order.price,
            quantity: order.quantity,
        }
    }

    /// Reject events that could never be matched to an order.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Validation`] when the serial is blank or an id is zero.
    pub fn validate(&self) -> Result<(), SeckillError> {
        if self.order_serial.is_empty() {
            return Err(SeckillError::Validation("order serial must not be empty".into()));
        }
        if self.user_id.get() == 0 || self.activity_id.get() == 0 || self.product_id.get() == 0 {
            return Err(SeckillError::Validation(
                "user, activity and product ids must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Encode as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::Serialization(e.to_string()))
    }

    /// Decode from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Serialization`] for a malformed body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, BrokerError> {
        serde_json::from_slice(bytes).map_err(|e| BrokerError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message() -> OrderMessage {
        OrderMessage {
            order_serial: OrderSerial::new("abc123"),
            user_id: UserId::new(1),
            activity_id: ActivityId::new(2),
            product_id: ProductId::new(3),
            amount: Money::from_cents(1000),
            price: Money::from_cents(500),
            quantity: 2,
        }
    }

    #[test]
    fn wire_field_names() {
        let json: serde_json::Value = serde_json::from_slice(&message().to_bytes().unwrap()).unwrap();
        assert_eq!(json["orderSerial"], "abc123");
        assert_eq!(json["userID"], 1);
        assert_eq!(json["activityID"], 2);
        assert_eq!(json["productID"], 3);
        assert_eq!(json["amount"], 1000);
        assert_eq!(json["price"], 500);
        assert_eq!(json["quantity"], 2);
    }

    #[test]
    fn validation_rejects_blank_serial_and_zero_ids() {
        assert!(message().validate().is_ok());

        let mut blank = message();
        blank.order_serial = OrderSerial::new("");
        assert!(blank.validate().is_err());

        let mut zero = message();
        zero.product_id = ProductId::new(0);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn malformed_body_is_a_serialization_error() {
        assert!(matches!(
            OrderMessage::from_slice(b"{not json"),
            Err(BrokerError::Serialization(_))
        ));
    }
}
