//! Order-creation event producer.

use seckill_core::broker::MessageBroker;
use seckill_core::error::SeckillError;
use seckill_core::message::OrderMessage;
use seckill_core::types::Order;
use seckill_runtime::metrics::EventMetrics;
use std::sync::Arc;
use tracing::{debug, error};

/// Publishes [`OrderMessage`]s keyed by order serial.
#[derive(Clone)]
pub struct OrderProducer {
    broker: Arc<dyn MessageBroker>,
    topic: String,
}

impl OrderProducer {
    /// Producer writing to `topic`.
    #[must_use]
    pub fn new(broker: Arc<dyn MessageBroker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    /// Topic events are written to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish the event for `order`.
    ///
    /// # Errors
    ///
    /// See [`OrderProducer::publish`].
    pub async fn publish_order(&self, order: &Order) -> Result<(), SeckillError> {
        self.publish(&OrderMessage::from_order(order)).await
    }

    /// Validate and publish `message`.
    ///
    /// # Errors
    ///
    /// [`SeckillError::Validation`] for a message that could never match an
    /// order, [`SeckillError::Transient`] if the broker rejects it.
    pub async fn publish(&self, message: &OrderMessage) -> Result<(), SeckillError> {
        message.validate()?;
        let payload = message.to_bytes()?;

        match self
            .broker
            .publish(&self.topic, message.order_serial.as_str(), payload)
            .await
        {
            Ok(()) => {
                EventMetrics::record_published();
                debug!(order_serial = %message.order_serial, topic = %self.topic, "Order event published");
                Ok(())
            }
            Err(e) => {
                EventMetrics::record_publish_error();
                error!(order_serial = %message.order_serial, error = %e, "Failed to publish order event");
                Err(e.into())
            }
        }
    }
}
