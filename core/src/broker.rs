//! Durable, at-least-once message broker.
//!
//! # Delivery model
//!
//! ```text
//! publish(topic, key, payload) ──► durable topic ──► subscribe(topic)
//!                                                        │
//!                                            one Delivery at a time
//!                                                        │
//!                                     ┌──────────────────┼──────────────────┐
//!                                     ▼                  ▼                  ▼
//!                                   ack()        nack(requeue=true)  nack(requeue=false)
//!                                  removed         redelivered           dropped
//! ```
//!
//! A subscription hands out one [`Delivery`] at a time and does not produce
//! the next one until the current delivery is settled (prefetch of one).
//! Dropping a delivery without settling it counts as a nack with requeue, so
//! a message is never lost because a handler panicked or returned early.
//!
//! Publishing may be called concurrently from any number of tasks;
//! implementations serialize access to their underlying channel.

use crate::error::BrokerError;
use futures::Stream;
use futures::future::BoxFuture;
use std::pin::Pin;
use tokio::sync::oneshot;

/// How a delivery was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Processed; remove from the queue.
    Ack,
    /// Not processed. With `requeue`, the message is delivered again.
    Nack {
        /// Redeliver the message.
        requeue: bool,
    },
}

/// A message handed to a consumer, settled exactly once.
#[derive(Debug)]
pub struct Delivery {
    key: Option<String>,
    payload: Vec<u8>,
    redelivered: bool,
    settle: Option<oneshot::Sender<Acknowledgement>>,
}

impl Delivery {
    /// Create a delivery and the receiver on which its settlement arrives.
    #[must_use]
    pub fn new(
        key: Option<String>,
        payload: Vec<u8>,
        redelivered: bool,
    ) -> (Self, oneshot::Receiver<Acknowledgement>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                key,
                payload,
                redelivered,
                settle: Some(tx),
            },
            rx,
        )
    }

    /// Message key (the order serial for order events).
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Message body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether this message was delivered before.
    #[must_use]
    pub const fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge successful processing.
    pub fn ack(mut self) {
        self.settle_with(Acknowledgement::Ack);
    }

    /// Reject the message, optionally asking for redelivery.
    pub fn nack(mut self, requeue: bool) {
        self.settle_with(Acknowledgement::Nack { requeue });
    }

    fn settle_with(&mut self, ack: Acknowledgement) {
        if let Some(tx) = self.settle.take() {
            // The transport may have shut down already; nothing left to tell.
            let _ = tx.send(ack);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.settle_with(Acknowledgement::Nack { requeue: true });
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// Message broker port.
///
/// Dyn-compatible so services can hold `Arc<dyn MessageBroker>`.
pub trait MessageBroker: Send + Sync {
    /// Publish `payload` to `topic`, keyed by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker did not accept the message.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Subscribe to `topic`, receiving one delivery at a time.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the subscription cannot be set up.
    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<DeliveryStream, BrokerError>>;
}
