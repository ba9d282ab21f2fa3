//! Redpanda event bus for the baggage tracker.
//!
//! Implements [`EventBus`] from `baggage-tracker-core` on rdkafka, so any
//! Kafka-compatible broker works (Redpanda, Apache Kafka, MSK).
//!
//! # Delivery Semantics
//!
//! **Keyed publish**: every record carries the baggage id as its key, so all
//! changes of one bag land on one partition in publish order.
//!
//! **At-least-once consumption** with manual commits:
//! - Auto-commit is off; nothing is committed when a record is read
//! - The consumer commits a record's offset only when [`BusRecord::ack`] is
//!   called, after the notification is durable
//! - A crash before the ack means the record is redelivered to the group
//!
//! # Example
//!
//! ```no_run
//! use baggage_tracker_core::event_bus::EventBus;
//! use baggage_tracker_redpanda::RedpandaEventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::new("localhost:9092")?;
//!
//! let position = bus.publish("baggage-state-change", "100", br#"{"baggageId":100}"#).await?;
//! println!("stored at {}:{}", position.partition, position.offset);
//!
//! let mut stream = bus.subscribe(&["baggage-state-change"], "passenger-service").await?;
//! while let Some(record) = stream.next().await {
//!     let record = record?;
//!     // ... make the effect durable, then:
//!     record.ack()?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use baggage_tracker_core::event_bus::{
    Acknowledge, BusRecord, EventBus, EventBusError, EventStream, RecordPosition,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Redpanda-backed [`EventBus`].
///
/// The producer is shared by every publish. Each [`EventBus::subscribe`]
/// creates its own consumer, owned by a forwarding task and by the
/// acknowledgement handle carried in every delivered record.
///
/// # Example
///
/// ```no_run
/// use baggage_tracker_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    buffer_size: usize,
    auto_offset_reset: String,
    session_timeout_ms: u32,
}

impl RedpandaEventBus {
    /// Bus with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers this bus talks to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn consumer(&self, group: &str) -> Result<StreamConsumer, KafkaError> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false")
            .create()
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated bootstrap servers (required).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgement mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`. Anything weaker can lose an acknowledged change.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// How long a publish may wait for the broker.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Records buffered between the consumer and the subscriber.
    ///
    /// Default: 1000. Zero is treated as one.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where a group without committed offsets starts reading.
    ///
    /// Default: `"earliest"`, so a freshly deployed subscriber sees every
    /// change still retained on the topic.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Consumer session timeout.
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer configuration is rejected.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("enable.idempotence", if acks == "all" { "true" } else { "false" })
            .set("compression.type", compression)
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(1000).max(1);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());
        let session_timeout_ms = self
            .session_timeout
            .map_or(10_000, |d| u32::try_from(d.as_millis()).unwrap_or(u32::MAX));

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            buffer_size,
            auto_offset_reset,
            session_timeout_ms,
        })
    }
}

/// Map a producer error onto the bus error taxonomy.
fn publish_error(topic: &str, error: &KafkaError) -> EventBusError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageTimedOut | RDKafkaErrorCode::RequestTimedOut) => {
            EventBusError::Timeout(topic.to_string())
        }
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessage
            | RDKafkaErrorCode::InvalidMessageSize
            | RDKafkaErrorCode::TopicAuthorizationFailed,
        ) => EventBusError::RecordRejected {
            topic: topic.to_string(),
            reason: error.to_string(),
        },
        Some(RDKafkaErrorCode::InvalidTopic) => EventBusError::InvalidTopic(topic.to_string()),
        _ => EventBusError::PublishFailed {
            topic: topic.to_string(),
            reason: error.to_string(),
        },
    }
}

/// Commits offsets for one subscription.
struct ConsumerAcker {
    consumer: Arc<StreamConsumer>,
}

impl Acknowledge for ConsumerAcker {
    fn ack(&self, topic: &str, partition: i32, offset: i64) -> Result<(), EventBusError> {
        let commit_failed = |reason: String| EventBusError::CommitFailed {
            topic: topic.to_string(),
            partition,
            offset,
            reason,
        };

        // Kafka commits the next offset to read
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| commit_failed(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| commit_failed(e.to_string()))?;

        tracing::trace!(topic, partition, offset, "Offset committed");
        Ok(())
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<RecordPosition, EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.to_string();
        let payload = payload.to_vec();

        Box::pin(async move {
            let record = FutureRecord::to(&topic).key(&key).payload(&payload);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition,
                        offset,
                        "Record published"
                    );
                    Ok(RecordPosition { partition, offset })
                }
                Err((kafka_error, _)) => {
                    let error = publish_error(&topic, &kafka_error);
                    tracing::warn!(
                        topic = %topic,
                        key = %key,
                        error = %kafka_error,
                        transient = error.is_transient(),
                        "Failed to publish record"
                    );
                    Err(error)
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let group = group.to_string();

        Box::pin(async move {
            let subscription_failed = |reason: String| EventBusError::SubscriptionFailed {
                topics: topics.clone(),
                reason,
            };

            let consumer = self
                .consumer(&group)
                .map_err(|e| subscription_failed(format!("Failed to create consumer: {e}")))?;
            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| subscription_failed(format!("Failed to subscribe to topics: {e}")))?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %group,
                buffer_size = self.buffer_size,
                "Subscribed to topics"
            );

            let consumer = Arc::new(consumer);
            let acker: Arc<dyn Acknowledge> = Arc::new(ConsumerAcker {
                consumer: Arc::clone(&consumer),
            });
            let (tx, mut rx) = tokio::sync::mpsc::channel(self.buffer_size);

            tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        () = tx.closed() => break,
                        received = consumer.recv() => received,
                    };

                    let item = match received {
                        Ok(message) => {
                            tracing::trace!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "Received record"
                            );
                            // An empty payload is handed on; the subscriber dead-letters it
                            Ok(BusRecord::new(
                                message.topic(),
                                message.partition(),
                                message.offset(),
                                message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
                                message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                                Arc::clone(&acker),
                            ))
                        }
                        Err(e) => Err(EventBusError::TransportError(format!(
                            "Failed to receive record: {e}"
                        ))),
                    };

                    if tx.send(item).await.is_err() {
                        break;
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn build_requires_brokers() {
        let result = RedpandaEventBus::builder().build();
        assert!(matches!(result, Err(EventBusError::ConnectionFailed(_))));
    }

    #[test]
    fn timeouts_are_transient() {
        let err = publish_error(
            "baggage-state-change",
            &KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut),
        );
        assert_eq!(err, EventBusError::Timeout("baggage-state-change".into()));
        assert!(err.is_transient());
    }

    #[test]
    fn oversized_records_are_rejected() {
        let err = publish_error(
            "baggage-state-change",
            &KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge),
        );
        assert!(matches!(err, EventBusError::RecordRejected { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn leader_changes_are_retried() {
        let err = publish_error(
            "baggage-state-change",
            &KafkaError::MessageProduction(RDKafkaErrorCode::NotLeaderForPartition),
        );
        assert!(matches!(err, EventBusError::PublishFailed { .. }));
        assert!(err.is_transient());
    }
}
