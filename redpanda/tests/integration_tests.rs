//! Integration tests for [`RedpandaBroker`] against a real Kafka instance.
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p seckill-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use seckill_core::broker::MessageBroker;
use seckill_redpanda::RedpandaBroker;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

/// Publish warmup messages until the topic accepts writes.
async fn wait_for_topic(broker: &RedpandaBroker, topic: &str) {
    for attempt in 1..=60 {
        if broker.publish(topic, "warmup", b"warmup".to_vec()).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(attempt != 60, "Kafka failed to become ready");
    }
}

async fn next_non_warmup(
    stream: &mut seckill_core::broker::DeliveryStream,
) -> seckill_core::broker::Delivery {
    loop {
        let delivery = tokio::time::timeout(Duration::from_secs(30), stream.next())
            .await
            .expect("Timed out waiting for delivery")
            .expect("Stream ended")
            .expect("Delivery error");
        if delivery.key() == Some("warmup") {
            delivery.ack();
            continue;
        }
        return delivery;
    }
}

#[tokio::test]
#[ignore]
async fn test_nack_with_requeue_redelivers_then_ack_commits() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");
    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let broker = RedpandaBroker::builder()
        .brokers(&brokers)
        .consumer_group("seckill-it")
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create broker");
    wait_for_topic(&broker, "seckill.order").await;

    broker
        .publish("seckill.order", "serial-1", br#"{"orderSerial":"serial-1"}"#.to_vec())
        .await
        .expect("Publish failed");

    let mut stream = broker.subscribe("seckill.order").await.expect("Subscribe failed");

    let first = next_non_warmup(&mut stream).await;
    assert_eq!(first.key(), Some("serial-1"));
    assert!(!first.is_redelivered());
    first.nack(true);

    let second = next_non_warmup(&mut stream).await;
    assert_eq!(second.key(), Some("serial-1"));
    assert!(second.is_redelivered());
    second.ack();

    broker
        .publish("seckill.order", "serial-2", b"{}".to_vec())
        .await
        .expect("Publish failed");
    let third = next_non_warmup(&mut stream).await;
    assert_eq!(third.key(), Some("serial-2"));
    third.ack();
}
