//! Integration tests for [`RedpandaAdapter`] against a real Kafka instance.
//!
//! These tests use testcontainers to start a broker and validate:
//! - Records are decoded into envelopes in partition order
//! - Undecodable records surface as delivery errors without stopping the stream
//! - Cancelling the subscription ends the stream
//! - Committed offsets are not redelivered to the same consumer group
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they require
//! Docker and take 15-60 seconds each to start Kafka.
//!
//! ```bash
//! cargo test -p event-consumer-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use event_consumer_core::{Context, Envelope, MessagingAdapter, Subscription};
use event_consumer_redpanda::RedpandaAdapter;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
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

    (kafka, format!("{host}:{port}"))
}

fn producer(brokers: &str) -> FutureProducer {
    ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "10000")
        .create()
        .expect("Failed to create producer")
}

/// Publish `payload` and retry until topic auto-creation has settled.
async fn produce(producer: &FutureProducer, topic: &str, key: &str, payload: &str) {
    for attempt in 1..=30 {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        if producer
            .send(record, Timeout::After(Duration::from_secs(5)))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 30, "Failed to produce to {topic}");
    }
}

async fn receive(subscription: &mut Subscription, count: usize) -> Vec<Envelope> {
    let mut received = Vec::new();
    tokio::time::timeout(RECEIVE_TIMEOUT, async {
        while received.len() < count {
            match subscription.stream.next().await {
                Some(envelope) => received.push(envelope),
                None => break,
            }
        }
    })
    .await
    .expect("Timeout waiting for envelopes");
    received
}

fn adapter(brokers: &str, topic: &str, group: &str) -> RedpandaAdapter {
    RedpandaAdapter::builder()
        .brokers(brokers)
        .topics([topic])
        .consumer_group(group)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to build adapter")
}

#[tokio::test]
#[ignore]
async fn test_records_become_envelopes_in_order() {
    let (_kafka, brokers) = start_kafka().await;
    let producer = producer(&brokers);

    produce(
        &producer,
        "operations",
        "k-1",
        r#"{"operationID":"op-1","status":"ok","command":"process"}"#,
    )
    .await;
    produce(&producer, "operations", "k-2", "not json").await;
    produce(
        &producer,
        "operations",
        "k-3",
        r#"{"operationID":"op-3","status":"ok","command":"process"}"#,
    )
    .await;

    let adapter = adapter(&brokers, "operations", "order-test");
    let ctx = Context::background();
    let mut subscription = adapter.subscribe(&ctx).await.expect("Failed to subscribe");

    let received = receive(&mut subscription, 3).await;
    assert_eq!(received.len(), 3);

    assert!(!received[0].is_error());
    assert_eq!(received[0].operation_id().unwrap().as_str(), "op-1");
    assert!(received[1].is_error());
    assert_eq!(received[1].operation_id().unwrap().as_str(), "k-2");
    assert!(!received[2].is_error());
    assert_eq!(received[2].operation_id().unwrap().as_str(), "op-3");

    subscription.cancel.cancel();
    adapter.close(&ctx).await;
}

#[tokio::test]
#[ignore]
async fn test_cancel_ends_stream() {
    let (_kafka, brokers) = start_kafka().await;
    let producer = producer(&brokers);
    produce(
        &producer,
        "cancel-events",
        "k-1",
        r#"{"operationID":"op-1","status":"ok","command":"process"}"#,
    )
    .await;

    let adapter = adapter(&brokers, "cancel-events", "cancel-test");
    let ctx = Context::background();
    let mut subscription = adapter.subscribe(&ctx).await.expect("Failed to subscribe");
    assert_eq!(receive(&mut subscription, 1).await.len(), 1);

    subscription.cancel.cancel();

    let ended = tokio::time::timeout(RECEIVE_TIMEOUT, subscription.stream.next())
        .await
        .expect("Stream did not end after cancel");
    assert!(ended.is_none());

    adapter.close(&ctx).await;
    adapter.close(&ctx).await;
}

#[tokio::test]
#[ignore]
async fn test_committed_records_are_not_redelivered() {
    let (_kafka, brokers) = start_kafka().await;
    let producer = producer(&brokers);
    produce(
        &producer,
        "commit-events",
        "k-1",
        r#"{"operationID":"op-1","status":"ok","command":"process"}"#,
    )
    .await;

    let first = adapter(&brokers, "commit-events", "commit-test");
    let ctx = Context::background();
    let mut subscription = first.subscribe(&ctx).await.expect("Failed to subscribe");
    assert_eq!(receive(&mut subscription, 1).await.len(), 1);

    // Let the async commit land before the consumer leaves the group.
    tokio::time::sleep(Duration::from_secs(2)).await;
    subscription.cancel.cancel();
    first.close(&ctx).await;

    produce(
        &producer,
        "commit-events",
        "k-2",
        r#"{"operationID":"op-2","status":"ok","command":"process"}"#,
    )
    .await;

    let second = adapter(&brokers, "commit-events", "commit-test");
    let mut subscription = second.subscribe(&ctx).await.expect("Failed to resubscribe");
    let received = receive(&mut subscription, 1).await;
    assert_eq!(received[0].operation_id().unwrap().as_str(), "op-2");

    subscription.cancel.cancel();
    second.close(&ctx).await;
}
