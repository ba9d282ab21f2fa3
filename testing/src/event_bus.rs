//! In-memory partitioned event bus.
//!
//! Models the parts of a Kafka-style log that the baggage tracker relies on:
//!
//! - records are routed to a partition by hashing the key, so records sharing
//!   a key keep their order
//! - each consumer group has committed offsets per partition
//! - subscribing replays everything after the committed offset, so unacked
//!   records are redelivered after a "restart"
//! - a new subscription for a group replaces the previous one (rebalance)

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use baggage_tracker_core::event_bus::{
    Acknowledge, BusRecord, EventBus, EventBusError, EventStream, RecordPosition,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A record as stored in a partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRecord {
    /// Topic the record was published to.
    pub topic: String,
    /// Partition it landed on.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Partition key.
    pub key: String,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

struct Subscription {
    topics: Vec<String>,
    tx: mpsc::UnboundedSender<Result<BusRecord, EventBusError>>,
    acker: Arc<dyn Acknowledge>,
}

#[derive(Default)]
struct BusState {
    /// topic -> partitions -> records
    logs: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// Every record in publish order, across topics.
    history: Vec<StoredRecord>,
    /// (group, topic, partition) -> next offset to deliver
    committed: HashMap<(String, String, i32), i64>,
    /// group -> active subscription
    subscriptions: HashMap<String, Subscription>,
    /// Errors to return from the next publishes, in order.
    publish_failures: VecDeque<EventBusError>,
}

/// In-memory [`EventBus`] for tests.
///
/// # Example
///
/// ```
/// use baggage_tracker_core::event_bus::EventBus;
/// use baggage_tracker_testing::InMemoryEventBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// bus.publish("baggage-state-change", "100", b"{}").await?;
/// assert_eq!(bus.published("baggage-state-change").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
    partitions: i32,
}

impl InMemoryEventBus {
    /// Bus with four partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(4)
    }

    /// Bus with `partitions` partitions per topic.
    #[must_use]
    pub fn with_partitions(partitions: i32) -> Self {
        assert!(partitions > 0, "partitions must be greater than 0");
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            partitions,
        }
    }

    /// Partition that `key` is routed to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let partitions = u64::try_from(self.partitions).unwrap_or(1);
        i32::try_from(hasher.finish() % partitions).unwrap_or(0)
    }

    /// Make the next publish calls fail with the given errors, in order.
    pub fn fail_next_publishes(&self, errors: impl IntoIterator<Item = EventBusError>) {
        self.state.lock().unwrap().publish_failures.extend(errors);
    }

    /// All records published to `topic`, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<StoredRecord> {
        self.state
            .lock()
            .unwrap()
            .history
            .iter()
            .filter(|record| record.topic == topic)
            .cloned()
            .collect()
    }

    /// Next offset `group` will receive on `topic`/`partition`.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> i64 {
        self.state
            .lock()
            .unwrap()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }

    /// Number of records on `topic` that `group` has not acknowledged.
    #[must_use]
    pub fn lag(&self, group: &str, topic: &str) -> i64 {
        let state = self.state.lock().unwrap();
        let Some(partitions) = state.logs.get(topic) else {
            return 0;
        };
        partitions
            .iter()
            .enumerate()
            .map(|(index, records)| {
                let partition = i32::try_from(index).unwrap_or(0);
                let committed = state
                    .committed
                    .get(&(group.to_string(), topic.to_string(), partition))
                    .copied()
                    .unwrap_or(0);
                i64::try_from(records.len()).unwrap_or(0) - committed
            })
            .sum()
    }

    fn append(&self, topic: &str, key: &str, payload: &[u8]) -> Result<RecordPosition, EventBusError> {
        let partition = self.partition_for(key);
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.publish_failures.pop_front() {
            return Err(error);
        }

        let partitions = usize::try_from(self.partitions).unwrap_or(1);
        let log = state
            .logs
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions]);
        let records = &mut log[usize::try_from(partition).unwrap_or(0)];
        let offset = i64::try_from(records.len()).unwrap_or(i64::MAX);
        let record = StoredRecord {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.to_string(),
            payload: payload.to_vec(),
        };
        records.push(record.clone());
        state.history.push(record.clone());

        state.subscriptions.retain(|_, subscription| {
            if !subscription.topics.iter().any(|t| t == topic) {
                return true;
            }
            subscription
                .tx
                .send(Ok(to_bus_record(&record, &subscription.acker)))
                .is_ok()
        });

        Ok(RecordPosition { partition, offset })
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn to_bus_record(record: &StoredRecord, acker: &Arc<dyn Acknowledge>) -> BusRecord {
    BusRecord::new(
        record.topic.clone(),
        record.partition,
        record.offset,
        Some(record.key.clone()),
        record.payload.clone(),
        Arc::clone(acker),
    )
}

struct GroupAcker {
    state: Arc<Mutex<BusState>>,
    group: String,
}

impl Acknowledge for GroupAcker {
    fn ack(&self, topic: &str, partition: i32, offset: i64) -> Result<(), EventBusError> {
        let mut state = self.state.lock().unwrap();
        let next = state
            .committed
            .entry((self.group.clone(), topic.to_string(), partition))
            .or_insert(0);
        *next = (*next).max(offset + 1);
        Ok(())
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<RecordPosition, EventBusError>> + Send + '_>> {
        let result = self.append(topic, key, payload);
        Box::pin(async move { result })
    }

    fn subscribe(
        &self,
        topics: &[&str],
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let group = group.to_string();

        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let acker: Arc<dyn Acknowledge> = Arc::new(GroupAcker {
                state: Arc::clone(&self.state),
                group: group.clone(),
            });

            let mut state = self.state.lock().unwrap();
            for topic in &topics {
                let Some(partitions) = state.logs.get(topic) else {
                    continue;
                };
                for records in partitions {
                    for record in records {
                        let next = state
                            .committed
                            .get(&(group.clone(), topic.clone(), record.partition))
                            .copied()
                            .unwrap_or(0);
                        if record.offset >= next {
                            // Receiver is alive until this function returns
                            let _ = tx.send(Ok(to_bus_record(record, &acker)));
                        }
                    }
                }
            }
            state
                .subscriptions
                .insert(group, Subscription { topics, tx, acker });
            drop(state);

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}
