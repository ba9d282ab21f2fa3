//! Change publisher: puts baggage state change events on the bus.
//!
//! Events are keyed by baggage id, so the bus keeps every bag's events in
//! order on one partition. Transient bus errors are retried with exponential
//! backoff; anything else, or an exhausted budget, surfaces as
//! [`PublishError`]. The caller's status change stays committed and the
//! outbox row stays behind for the dispatcher.

use crate::metrics::PublisherMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use baggage_tracker_core::event::BaggageStateChangeEvent;
use baggage_tracker_core::event_bus::{EventBus, EventBusError, RecordPosition};
use baggage_tracker_core::store::StoreError;
use baggage_tracker_core::types::EventId;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors from [`ChangePublisher::publish`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    /// The event could not be serialized.
    #[error("Failed to encode event {event_id}: {reason}")]
    Encode {
        /// Event that failed to encode
        event_id: EventId,
        /// Serializer message
        reason: String,
    },

    /// The bus kept failing with transient errors.
    #[error("Publishing event {event_id} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        /// Event that was not acknowledged
        event_id: EventId,
        /// Attempts made
        attempts: u32,
        /// Last bus error
        #[source]
        source: EventBusError,
    },

    /// The bus refused the event with a permanent error.
    #[error("Bus rejected event {event_id}: {source}")]
    Rejected {
        /// Event that was refused
        event_id: EventId,
        /// Bus error
        #[source]
        source: EventBusError,
    },

    /// Earlier rows for the bag could not be read, so nothing was published.
    /// The event stays in the outbox for the dispatcher.
    #[error("Event {event_id} left for the outbox dispatcher: {source}")]
    Deferred {
        /// Event that was not published
        event_id: EventId,
        /// Why the outbox could not be read
        #[source]
        source: StoreError,
    },
}

impl PublishError {
    /// Id of the event that was not announced.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::Encode { event_id, .. }
            | Self::Exhausted { event_id, .. }
            | Self::Rejected { event_id, .. }
            | Self::Deferred { event_id, .. } => *event_id,
        }
    }
}

/// An acknowledged publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Published {
    /// The event that was published
    pub event_id: EventId,
    /// Where the bus stored it
    pub position: RecordPosition,
    /// Attempts it took
    pub attempts: u32,
}

/// Publishes [`BaggageStateChangeEvent`]s keyed by baggage id.
#[derive(Clone)]
pub struct ChangePublisher {
    bus: Arc<dyn EventBus>,
    topic: String,
    policy: RetryPolicy,
}

impl ChangePublisher {
    /// Publisher writing to `topic` with the default retry policy.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Topic events go to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `event` and wait for the bus acknowledgement.
    ///
    /// # Errors
    ///
    /// [`PublishError::Exhausted`] when transient errors outlast the retry
    /// budget, [`PublishError::Rejected`] on a permanent bus error and
    /// [`PublishError::Encode`] if the event cannot be serialized.
    #[tracing::instrument(
        skip(self, event),
        fields(event_id = %event.event_id, baggage_id = %event.baggage_id, new_status = %event.new_status)
    )]
    pub async fn publish(&self, event: &BaggageStateChangeEvent) -> Result<Published, PublishError> {
        let event_id = event.event_id;
        let payload = event.encode().map_err(|e| PublishError::Encode {
            event_id,
            reason: e.to_string(),
        })?;
        let key = event.partition_key();

        let started = Instant::now();
        let mut attempts = 0_u32;
        let result = retry_with_predicate(
            &self.policy,
            || {
                attempts += 1;
                if attempts > 1 {
                    PublisherMetrics::record_retry();
                }
                self.bus.publish(&self.topic, &key, &payload)
            },
            EventBusError::is_transient,
        )
        .await;

        match result {
            Ok(position) => {
                PublisherMetrics::record_published(started.elapsed());
                tracing::debug!(
                    partition = position.partition,
                    offset = position.offset,
                    attempts,
                    "Event published"
                );
                Ok(Published {
                    event_id,
                    position,
                    attempts,
                })
            }
            Err(source) => {
                PublisherMetrics::record_failure();
                tracing::error!(attempts, error = %source, "Event not published");
                if source.is_transient() {
                    Err(PublishError::Exhausted {
                        event_id,
                        attempts,
                        source,
                    })
                } else {
                    Err(PublishError::Rejected { event_id, source })
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use baggage_tracker_core::baggage::Baggage;
    use baggage_tracker_core::status::BaggageStatus;
    use baggage_tracker_core::types::{BaggageId, PassengerId};
    use baggage_tracker_testing::InMemoryEventBus;
    use chrono::Utc;
    use std::time::Duration;

    const TOPIC: &str = "baggage-state-change";

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .build()
    }

    fn claimed_event() -> BaggageStateChangeEvent {
        let bag = Baggage {
            id: BaggageId::new(100),
            passenger_id: PassengerId::new(1),
            weight: 20,
            status: BaggageStatus::CheckedIn,
        };
        let change = bag.apply(BaggageStatus::Claimed).unwrap();
        BaggageStateChangeEvent::from_change(EventId::generate(), &change, Utc::now())
    }

    #[tokio::test]
    async fn publishes_payload_keyed_by_baggage_id() {
        let bus = InMemoryEventBus::new();
        let publisher = ChangePublisher::new(Arc::new(bus.clone()), TOPIC).with_retry_policy(fast_policy());
        let event = claimed_event();

        let published = publisher.publish(&event).await.unwrap();
        assert_eq!(published.attempts, 1);

        let records = bus.published(TOPIC);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "100");
        assert_eq!(records[0].partition, published.position.partition);
        assert_eq!(BaggageStateChangeEvent::decode(&records[0].payload).unwrap(), event);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes([
            EventBusError::Timeout(TOPIC.into()),
            EventBusError::ConnectionFailed("broker down".into()),
        ]);
        let publisher = ChangePublisher::new(Arc::new(bus.clone()), TOPIC).with_retry_policy(fast_policy());

        let published = publisher.publish(&claimed_event()).await.unwrap();
        assert_eq!(published.attempts, 3);
        assert_eq!(bus.published(TOPIC).len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(std::iter::repeat_n(EventBusError::Timeout(TOPIC.into()), 5));
        let publisher = ChangePublisher::new(Arc::new(bus.clone()), TOPIC).with_retry_policy(fast_policy());
        let event = claimed_event();

        let err = publisher.publish(&event).await.unwrap_err();
        assert!(matches!(err, PublishError::Exhausted { attempts: 5, .. }));
        assert_eq!(err.event_id(), event.event_id);
        assert!(bus.published(TOPIC).is_empty());
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes([EventBusError::RecordRejected {
            topic: TOPIC.into(),
            reason: "too large".into(),
        }]);
        let publisher = ChangePublisher::new(Arc::new(bus.clone()), TOPIC).with_retry_policy(fast_policy());

        let err = publisher.publish(&claimed_event()).await.unwrap_err();
        assert!(matches!(err, PublishError::Rejected { .. }));
        // The next publish goes through, so only one failure was consumed
        assert!(publisher.publish(&claimed_event()).await.is_ok());
    }
}
