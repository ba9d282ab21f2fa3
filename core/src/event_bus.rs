//! Event bus abstraction connecting the baggage and passenger subsystems.
//!
//! The bus is a durable, partitioned log with consumer-group semantics. The
//! baggage subsystem publishes status changes keyed by baggage id; the
//! passenger subsystem consumes them in its own consumer group.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ claim / lose ... │
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ 1. Commit status │
//! │   + outbox row   │◄─── Source of truth
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ 2. Publish keyed │
//! │   by baggage id  │◄─── At-least-once delivery
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ 3. Subscriber    │
//! │  dedup → notify  │◄─── Idempotent effect
//! └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Ordered per key**: records sharing a key land on one partition and keep
//!   their relative order; nothing is promised across keys
//! - **At-least-once delivery**: a record may be delivered more than once
//! - **Explicit acknowledgement**: a consumer acks each record with
//!   [`BusRecord::ack`] once its effect is durable; unacked records are
//!   redelivered to the group after a restart or rebalance
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `baggage-tracker-testing` - for tests
//! - `RedpandaEventBus` in `baggage-tracker-redpanda` - Kafka-compatible brokers

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker did not accept the record (leader unavailable, queue full, ...)
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// The broker rejected the record itself; resending it will not help
    #[error("Record rejected by topic '{topic}': {reason}")]
    RecordRejected {
        /// The topic that rejected the record
        topic: String,
        /// The reason for rejection
        reason: String,
    },

    /// Publish did not complete within the producer timeout
    #[error("Publish to topic '{0}' timed out")]
    Timeout(String),

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Committing a consumed offset failed
    #[error("Commit failed for {topic}[{partition}]@{offset}: {reason}")]
    CommitFailed {
        /// Topic of the record
        topic: String,
        /// Partition of the record
        partition: i32,
        /// Offset of the record
        offset: i64,
        /// The reason for failure
        reason: String,
    },

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl EventBusError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::PublishFailed { .. }
                | Self::Timeout(_)
                | Self::TransportError(_)
                | Self::CommitFailed { .. }
        )
    }
}

/// Where a published record landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    /// Partition the key hashed to.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// Commits consumed offsets on behalf of a subscription.
///
/// Implemented by each bus; a [`BusRecord`] carries the handle of the
/// subscription it came from.
pub trait Acknowledge: Send + Sync {
    /// Mark everything up to and including `offset` as consumed.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CommitFailed`] if the commit is not accepted.
    fn ack(&self, topic: &str, partition: i32, offset: i64) -> Result<(), EventBusError>;
}

/// A record delivered to a subscriber.
#[derive(Clone)]
pub struct BusRecord {
    /// Topic the record was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Partition key, if the producer set one.
    pub key: Option<String>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    acker: Arc<dyn Acknowledge>,
}

impl BusRecord {
    /// Create a record bound to the subscription that delivered it.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<String>,
        payload: Vec<u8>,
        acker: Arc<dyn Acknowledge>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            payload,
            acker,
        }
    }

    /// Acknowledge this record to the consumer group.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CommitFailed`] if the bus refuses the commit.
    /// The record may then be redelivered, which idempotent consumers tolerate.
    pub fn ack(&self) -> Result<(), EventBusError> {
        self.acker.ack(&self.topic, self.partition, self.offset)
    }
}

impl fmt::Debug for BusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusRecord")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Stream of records from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<BusRecord, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
/// bus can be shared as `Arc<dyn EventBus>` between the publisher, the outbox
/// dispatcher and the dead-letter sink.
pub trait EventBus: Send + Sync {
    /// Publish `payload` to `topic` under partition key `key`.
    ///
    /// Resolves once the broker has acknowledged the record.
    ///
    /// # Errors
    ///
    /// Returns an [`EventBusError`]; [`EventBusError::is_transient`] tells the
    /// caller whether a retry is worthwhile.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<RecordPosition, EventBusError>> + Send + '_>>;

    /// Join consumer group `group` on `topics`.
    ///
    /// Delivery resumes after the group's last acknowledged offset on each
    /// partition.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(
        &self,
        topics: &[&str],
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}

/// Decide whether a topic name is acceptable to Kafka-compatible brokers.
#[must_use]
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= 249
        && topic != "."
        && topic != ".."
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
