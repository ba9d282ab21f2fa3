//! Dead-letter destination backed by a bus topic.

use baggage_tracker_core::dead_letter::DeadLetter;
use baggage_tracker_core::event_bus::EventBus;
use baggage_tracker_core::store::{DeadLetterSink, StoreError, StoreFuture};
use std::sync::Arc;

/// Publishes dead letters as JSON to a dedicated topic.
///
/// Letters keep the original record's key, so a bag's dead letters stay in
/// order on the dead-letter topic too.
#[derive(Clone)]
pub struct BusDeadLetterSink {
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl BusDeadLetterSink {
    /// Sink publishing to `topic`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }
}

impl DeadLetterSink for BusDeadLetterSink {
    fn dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let payload =
                serde_json::to_vec(letter).map_err(|e| StoreError::Serialization(e.to_string()))?;
            let key = letter
                .key
                .clone()
                .unwrap_or_else(|| letter.source_partition.to_string());

            let position = self
                .bus
                .publish(&self.topic, &key, &payload)
                .await
                .map_err(|e| {
                    if e.is_transient() {
                        StoreError::Unavailable(e.to_string())
                    } else {
                        StoreError::Database(e.to_string())
                    }
                })?;

            tracing::warn!(
                dlq_topic = %self.topic,
                dlq_partition = position.partition,
                dlq_offset = position.offset,
                source_topic = %letter.source_topic,
                source_partition = letter.source_partition,
                source_offset = letter.source_offset,
                reason = %letter.reason,
                "Record dead-lettered"
            );
            Ok(())
        })
    }
}
