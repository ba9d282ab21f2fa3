//! Integration tests for [`RedpandaEventBus`] against a real Kafka broker.
//!
//! These tests are marked `#[ignore]` because they need Docker and take a
//! while to start Kafka. Run them explicitly:
//!
//! ```bash
//! cargo test -p baggage-tracker-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use baggage_tracker_core::event_bus::{BusRecord, EventBus, EventStream};
use baggage_tracker_redpanda::RedpandaEventBus;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const TOPIC: &str = "baggage-state-change";

/// Start Kafka and wait until it accepts a publish.
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
    let brokers = format!("{host}:{port}");

    let bus = bus(&brokers);
    for attempt in 1..=60 {
        if bus.publish("warmup", "warmup", b"{}").await.is_ok() {
            tokio::time::sleep(Duration::from_millis(500)).await;
            return (kafka, brokers);
        }
        assert!(attempt != 60, "Kafka failed to become ready");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    unreachable!("readiness loop either returns or panics")
}

fn bus(brokers: &str) -> RedpandaEventBus {
    RedpandaEventBus::builder()
        .brokers(brokers)
        .session_timeout(Duration::from_secs(6))
        .build()
        .expect("Failed to create event bus")
}

async fn next_record(stream: &mut EventStream) -> BusRecord {
    tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("Timed out waiting for a record")
        .expect("Stream ended")
        .expect("Receive failed")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn records_with_one_key_arrive_in_order_on_one_partition() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = bus(&brokers);

    let mut positions = Vec::new();
    for status in ["CHECKED_IN", "LOADED", "IN_TRANSIT"] {
        let payload = format!(r#"{{"baggageId":100,"newStatus":"{status}"}}"#);
        positions.push(bus.publish(TOPIC, "100", payload.as_bytes()).await.expect("publish"));
    }
    assert!(positions.iter().all(|p| p.partition == positions[0].partition));
    assert!(positions.windows(2).all(|w| w[0].offset < w[1].offset));

    let mut stream = bus.subscribe(&[TOPIC], "ordering-test").await.expect("subscribe");
    let mut received = Vec::new();
    for _ in 0..3 {
        let record = next_record(&mut stream).await;
        assert_eq!(record.key.as_deref(), Some("100"));
        received.push(String::from_utf8(record.payload.clone()).expect("utf-8"));
        record.ack().expect("ack");
    }
    assert!(received[0].contains("CHECKED_IN"));
    assert!(received[1].contains("LOADED"));
    assert!(received[2].contains("IN_TRANSIT"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn unacknowledged_record_is_redelivered_to_the_group() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = bus(&brokers);
    bus.publish(TOPIC, "7", br#"{"baggageId":7}"#).await.expect("publish");
    bus.publish(TOPIC, "7", br#"{"baggageId":7,"second":true}"#).await.expect("publish");

    {
        let mut stream = bus.subscribe(&[TOPIC], "redelivery-test").await.expect("subscribe");
        let first = next_record(&mut stream).await;
        first.ack().expect("ack");
        // Second record read but never acknowledged
        let _second = next_record(&mut stream).await;
    }
    // Let the group notice the old member is gone
    tokio::time::sleep(Duration::from_secs(8)).await;

    let mut stream = bus.subscribe(&[TOPIC], "redelivery-test").await.expect("resubscribe");
    let record = next_record(&mut stream).await;
    assert!(String::from_utf8_lossy(&record.payload).contains("second"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn groups_consume_independently() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = bus(&brokers);
    bus.publish(TOPIC, "1", br#"{"baggageId":1}"#).await.expect("publish");

    let mut passengers = bus.subscribe(&[TOPIC], "passenger-service").await.expect("subscribe");
    let mut audit = bus.subscribe(&[TOPIC], "audit").await.expect("subscribe");

    let a = next_record(&mut passengers).await;
    let b = next_record(&mut audit).await;
    assert_eq!(a.payload, b.payload);
    assert_eq!((a.partition, a.offset), (b.partition, b.offset));
}
