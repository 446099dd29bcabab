//! Redpanda message broker for seckill.
//!
//! Implements the [`MessageBroker`] port from `seckill-core` on top of rdkafka,
//! so it works against Redpanda or any other Kafka-compatible cluster.
//!
//! # Architecture
//!
//! ```text
//!  publish() ─┐
//!  publish() ─┼──► mpsc queue ──► publisher task ──► FutureProducer ──► topic
//!  publish() ─┘                   (one send at a time)
//!
//!  topic ──► StreamConsumer ──► consumer task ──► Delivery ──► subscriber
//!                                     ▲                            │
//!                                     └──── ack / nack (oneshot) ──┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - The consumer task hands out one delivery at a time and waits for it to be settled
//! - `ack` commits the offset
//! - `nack(requeue = true)`, or dropping the delivery, seeks back so the same
//!   message is delivered again (flagged as redelivered)
//! - `nack(requeue = false)` commits the offset and skips the message
//! - If the process crashes before commit, messages are redelivered
//!
//! # Example
//!
//! ```no_run
//! use seckill_core::broker::MessageBroker;
//! use seckill_redpanda::RedpandaBroker;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("seckill-order")
//!     .build()?;
//!
//! broker.publish("seckill.order", "serial-1", b"{}".to_vec()).await?;
//!
//! let mut deliveries = broker.subscribe("seckill.order").await?;
//! while let Some(delivery) = deliveries.next().await {
//!     delivery?.ack();
//! }
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use futures::future::BoxFuture;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Offset;
use seckill_core::broker::{Acknowledgement, Delivery, DeliveryStream, MessageBroker};
use seckill_core::error::BrokerError;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_millis(100);

struct PublishRequest {
    topic: String,
    key: String,
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<(), BrokerError>>,
}

/// Kafka-compatible [`MessageBroker`].
///
/// Publishing goes through an internal queue drained by a single task, so
/// concurrent callers never interleave sends on the producer. Each
/// subscription owns its own consumer.
pub struct RedpandaBroker {
    /// Publish queue drained by the publisher task
    queue: mpsc::Sender<PublishRequest>,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Auto offset reset policy
    auto_offset_reset: String,
    /// Pause before a requeued message is delivered again
    requeue_delay: Duration,
}

impl RedpandaBroker {
    /// Create a broker with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the broker.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn group_for(&self, topic: &str) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| format!("seckill-{topic}"))
    }
}

/// Builder for configuring a [`RedpandaBroker`].
///
/// # Example
///
/// ```no_run
/// use seckill_redpanda::RedpandaBroker;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    queue_capacity: Option<usize>,
    auto_offset_reset: Option<String>,
    requeue_delay: Option<Duration>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec.
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, each subscription uses `seckill-{topic}`. Instances sharing
    /// a group split the topic's partitions between them.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set how many publishes may wait in the internal queue.
    ///
    /// Values below one are raised to one. Default: 1024
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self
    }

    /// Set the auto offset reset policy for new consumer groups
    /// (`"earliest"`, `"latest"` or `"error"`).
    ///
    /// Default: "earliest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the pause before a requeued message is redelivered.
    ///
    /// Default: 100 ms
    #[must_use]
    pub const fn requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = Some(delay);
        self
    }

    /// Build the [`RedpandaBroker`] and start its publisher task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer
    /// - No Tokio runtime is running
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            BrokerError::ConnectionFailed(format!("Broker must be built inside a Tokio runtime: {e}"))
        })?;

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                BrokerError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let capacity = self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let (queue, requests) = mpsc::channel(capacity);
        runtime.spawn(run_publisher(producer, requests, timeout));

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            queue_capacity = capacity,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaBroker created successfully"
        );

        Ok(RedpandaBroker {
            queue,
            brokers,
            consumer_group: self.consumer_group,
            auto_offset_reset,
            requeue_delay: self.requeue_delay.unwrap_or(DEFAULT_REQUEUE_DELAY),
        })
    }
}

/// Drains the publish queue one request at a time. Exits once every
/// [`RedpandaBroker`] handle is gone.
async fn run_publisher(
    producer: FutureProducer,
    mut requests: mpsc::Receiver<PublishRequest>,
    timeout: Duration,
) {
    while let Some(request) = requests.recv().await {
        let record = FutureRecord::to(&request.topic)
            .payload(&request.payload)
            .key(&request.key);

        let result = match producer.send(record, Timeout::After(timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %request.topic,
                    key = %request.key,
                    partition,
                    offset,
                    "Message published successfully"
                );
                Ok(())
            }
            Err((kafka_error, _)) => {
                tracing::error!(
                    topic = %request.topic,
                    key = %request.key,
                    error = %kafka_error,
                    "Failed to publish message"
                );
                Err(BrokerError::PublishFailed {
                    topic: request.topic.clone(),
                    reason: kafka_error.to_string(),
                })
            }
        };

        // The caller may have given up waiting.
        let _ = request.reply.send(result);
    }

    tracing::debug!("Publisher task exiting");
}

impl MessageBroker for RedpandaBroker {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), BrokerError>> {
        let topic = topic.to_string();
        let key = key.to_string();

        Box::pin(async move {
            let (reply, outcome) = oneshot::channel();
            let request = PublishRequest {
                topic: topic.clone(),
                key,
                payload,
                reply,
            };

            if self.queue.send(request).await.is_err() {
                return Err(BrokerError::PublishFailed {
                    topic,
                    reason: "publisher task stopped".to_string(),
                });
            }

            outcome.await.unwrap_or_else(|_| {
                Err(BrokerError::PublishFailed {
                    topic,
                    reason: "publisher task dropped the request".to_string(),
                })
            })
        })
    }

    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<DeliveryStream, BrokerError>> {
        let topic = topic.to_string();
        let group = self.group_for(&topic);
        let brokers = self.brokers.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();
        let requeue_delay = self.requeue_delay;

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| BrokerError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to subscribe to topic: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %group,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            // Capacity one plus waiting on each settlement gives prefetch of one.
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(run_consumer(consumer, tx, requeue_delay));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

async fn run_consumer(
    consumer: StreamConsumer,
    tx: mpsc::Sender<Result<Delivery, BrokerError>>,
    requeue_delay: Duration,
) {
    let mut requeued: HashSet<(String, i32, i64)> = HashSet::new();
    let mut stream = consumer.stream();

    while let Some(msg_result) = stream.next().await {
        let message = match msg_result {
            Ok(message) => message,
            Err(e) => {
                let err = BrokerError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let position = (
            message.topic().to_string(),
            message.partition(),
            message.offset(),
        );
        let redelivered = requeued.remove(&position);
        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned());
        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();

        let (delivery, settled) = Delivery::new(key, payload, redelivered);
        if tx.send(Ok(delivery)).await.is_err() {
            tracing::debug!("Subscriber dropped, exiting consumer task");
            break;
        }

        // A dropped delivery settles as a requeue, so the error arm only
        // fires if the subscriber vanished mid-flight.
        let ack = settled
            .await
            .unwrap_or(Acknowledgement::Nack { requeue: true });

        match ack {
            Acknowledgement::Ack => commit(&consumer, &message, "ack"),
            Acknowledgement::Nack { requeue: false } => {
                tracing::warn!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    "Message rejected without requeue, skipping"
                );
                commit(&consumer, &message, "discard");
            }
            Acknowledgement::Nack { requeue: true } => {
                if let Err(e) = rewind(&consumer, &message) {
                    tracing::error!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Failed to seek back for redelivery"
                    );
                }
                requeued.insert(position);
                tokio::time::sleep(requeue_delay).await;
            }
        }

        if tx.is_closed() {
            break;
        }
    }

    tracing::debug!("Consumer task exiting");
}

fn commit(consumer: &StreamConsumer, message: &BorrowedMessage<'_>, reason: &'static str) {
    if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
        tracing::warn!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            reason,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

fn rewind(
    consumer: &StreamConsumer,
    message: &BorrowedMessage<'_>,
) -> rdkafka::error::KafkaResult<()> {
    consumer.seek(
        message.topic(),
        message.partition(),
        Offset::Offset(message.offset()),
        Timeout::After(Duration::from_secs(5)),
    )
}
