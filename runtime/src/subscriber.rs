//! Change subscriber: turns baggage state change records into passenger
//! notifications.
//!
//! # Processing a record
//!
//! ```text
//! RECEIVED ─► decode ──malformed──────────────────────► DEAD-LETTER, ack
//!               │
//!               ▼
//!           dedup lookup ──already notified───────────► DUPLICATE, ack
//!               │
//!               ▼
//!           monotonic guard ──not a successor─────────► DEAD-LETTER, ack
//!               │
//!               ▼
//!           insert-if-absent ──lost the race──────────► DUPLICATE, ack
//!               │
//!               ▼
//!           APPLIED, ack
//! ```
//!
//! A transient store failure anywhere leaves the record unacknowledged and
//! it is processed again after a backoff. Once the attempt budget is spent the
//! record is dead-lettered so the partition can move on.
//!
//! # Concurrency
//!
//! [`SubscriberPool`] pulls from one subscription and routes every record to
//! worker `partition mod workers`. A partition therefore belongs to exactly
//! one worker, which processes its records one at a time. Bags are keyed to
//! partitions, so each bag's events are handled in publish order.

use crate::metrics::SubscriberMetrics;
use crate::passenger::{PassengerService, PassengerServiceError};
use crate::retry::RetryPolicy;
use baggage_tracker_core::dead_letter::DeadLetter;
use baggage_tracker_core::environment::Clock;
use baggage_tracker_core::event::{BaggageStateChangeEvent, MalformedEventError};
use baggage_tracker_core::event_bus::{BusRecord, EventBus, EventBusError};
use baggage_tracker_core::status::BaggageStatus;
use baggage_tracker_core::store::{DeadLetterSink, InsertOutcome, StoreError};
use baggage_tracker_core::types::BaggageId;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// What happened to a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// A notification was created. Acknowledged.
    Applied,
    /// The event was already notified. Acknowledged, nothing written.
    Duplicate,
    /// Routed to the dead-letter destination with this reason. Acknowledged.
    DeadLettered(String),
    /// Not acknowledged; the record must be processed again.
    Retrying,
}

/// Errors raised while processing a record.
#[derive(Error, Debug)]
pub enum ConsumeError {
    /// The payload failed validation.
    #[error(transparent)]
    Malformed(#[from] MalformedEventError),

    /// The event does not follow the last status applied for its bag.
    #[error("Non-monotonic transition for baggage {baggage_id}: last applied {last_applied}, received {new_status}")]
    NonMonotonic {
        /// The bag
        baggage_id: BaggageId,
        /// Status of the last notification applied for it
        last_applied: BaggageStatus,
        /// Status carried by the event
        new_status: BaggageStatus,
    },

    /// The passenger service refused or failed.
    #[error(transparent)]
    Passenger(#[from] PassengerServiceError),

    /// The dedup lookup failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The dead-letter destination did not take the record.
    #[error("Dead-letter hand-over failed: {0}")]
    DeadLetter(#[source] StoreError),

    /// The record could not be acknowledged.
    #[error("Acknowledgement failed: {0}")]
    Ack(#[from] EventBusError),
}

impl ConsumeError {
    /// Whether processing the same record again may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) | Self::DeadLetter(e) => e.is_transient(),
            Self::Passenger(e) => e.is_transient(),
            Self::Ack(_) => true,
            Self::Malformed(_) | Self::NonMonotonic { .. } => false,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::NonMonotonic { .. } => "non_monotonic",
            Self::Passenger(_) => "rejected",
            Self::Store(_) => "store",
            Self::DeadLetter(_) => "dead_letter",
            Self::Ack(_) => "ack",
        }
    }
}

/// Per-worker memory of the last status applied for each bag.
///
/// Only the worker owning the bag's partition touches it.
#[derive(Debug, Default)]
pub struct PartitionState {
    last_applied: HashMap<BaggageId, BaggageStatus>,
}

impl PartitionState {
    /// Last status notified for `baggage_id`, if this worker saw one.
    #[must_use]
    pub fn last_applied(&self, baggage_id: BaggageId) -> Option<BaggageStatus> {
        self.last_applied.get(&baggage_id).copied()
    }

    fn check(&self, event: &BaggageStateChangeEvent) -> Result<(), ConsumeError> {
        match self.last_applied(event.baggage_id) {
            Some(last) if !last.can_transition_to(event.new_status) => Err(ConsumeError::NonMonotonic {
                baggage_id: event.baggage_id,
                last_applied: last,
                new_status: event.new_status,
            }),
            _ => Ok(()),
        }
    }

    fn record(&mut self, event: &BaggageStateChangeEvent) {
        self.last_applied.insert(event.baggage_id, event.new_status);
    }
}

/// Attempt bookkeeping for one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// When the subscriber first saw the record
    pub first_seen_at: DateTime<Utc>,
    /// Processing attempts so far
    pub attempts: u32,
    /// Reason the record was handed to the dead-letter destination, once it was
    pub dead_lettered: Option<String>,
}

impl Delivery {
    /// A record first seen at `first_seen_at`.
    #[must_use]
    pub const fn new(first_seen_at: DateTime<Utc>) -> Self {
        Self {
            first_seen_at,
            attempts: 0,
            dead_lettered: None,
        }
    }
}

/// Processes baggage state change records for the passenger subsystem.
pub struct ChangeSubscriber {
    passengers: Arc<PassengerService>,
    dead_letters: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl ChangeSubscriber {
    /// Subscriber with the default retry policy.
    #[must_use]
    pub fn new(
        passengers: Arc<PassengerService>,
        dead_letters: Arc<dyn DeadLetterSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            passengers,
            dead_letters,
            clock,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy bounding in-place redelivery.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start bookkeeping for a freshly received record.
    #[must_use]
    pub fn receive(&self) -> Delivery {
        Delivery::new(self.clock.now())
    }

    /// Process `record` once.
    ///
    /// Acknowledges the record unless the outcome is
    /// [`ProcessingOutcome::Retrying`].
    ///
    /// # Errors
    ///
    /// [`ConsumeError::DeadLetter`] or [`ConsumeError::Ack`] when the record
    /// could not be handed over or acknowledged; it stays unacknowledged.
    #[tracing::instrument(
        skip_all,
        fields(topic = %record.topic, partition = record.partition, offset = record.offset, attempt = delivery.attempts + 1)
    )]
    pub async fn process(
        &self,
        record: &BusRecord,
        state: &mut PartitionState,
        delivery: &mut Delivery,
    ) -> Result<ProcessingOutcome, ConsumeError> {
        if let Some(reason) = delivery.dead_lettered.clone() {
            // Already handed over; only the acknowledgement is missing
            record.ack()?;
            return Ok(ProcessingOutcome::DeadLettered(reason));
        }

        delivery.attempts += 1;
        let started = Instant::now();

        let outcome = match self.apply(record, state).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() && self.policy.allows_another(delivery.attempts) => {
                SubscriberMetrics::record_retry();
                tracing::warn!(error = %e, "Transient failure, record will be processed again");
                return Ok(ProcessingOutcome::Retrying);
            }
            Err(e) if e.is_transient() => {
                let reason = format!("retries exhausted: {e}");
                self.dead_letter(record, delivery, reason, "retries_exhausted").await?
            }
            Err(e) => self.dead_letter(record, delivery, e.to_string(), e.kind()).await?,
        };

        record.ack()?;
        SubscriberMetrics::record_processing(started.elapsed());
        Ok(outcome)
    }

    async fn apply(
        &self,
        record: &BusRecord,
        state: &mut PartitionState,
    ) -> Result<ProcessingOutcome, ConsumeError> {
        let event = BaggageStateChangeEvent::decode(&record.payload)?;

        if self.passengers.has_notification_for_event(&event.event_id).await? {
            SubscriberMetrics::record_duplicate();
            tracing::debug!(event_id = %event.event_id, "Duplicate event");
            return Ok(ProcessingOutcome::Duplicate);
        }

        state.check(&event)?;

        let notification = self.passengers.notification_for(&event);
        match self
            .passengers
            .add_notification_for_passenger(event.passenger_id, &notification)
            .await?
        {
            InsertOutcome::Inserted => {
                state.record(&event);
                SubscriberMetrics::record_applied();
                tracing::info!(
                    event_id = %event.event_id,
                    baggage_id = %event.baggage_id,
                    passenger_id = %event.passenger_id,
                    new_status = %event.new_status,
                    "Notification created"
                );
                Ok(ProcessingOutcome::Applied)
            }
            InsertOutcome::AlreadyPresent => {
                SubscriberMetrics::record_duplicate();
                tracing::debug!(event_id = %event.event_id, "Duplicate event caught by store");
                Ok(ProcessingOutcome::Duplicate)
            }
        }
    }

    async fn dead_letter(
        &self,
        record: &BusRecord,
        delivery: &mut Delivery,
        reason: String,
        kind: &'static str,
    ) -> Result<ProcessingOutcome, ConsumeError> {
        let letter = DeadLetter {
            original_event: DeadLetter::original_from_payload(&record.payload),
            reason,
            first_seen_at: delivery.first_seen_at,
            attempts: delivery.attempts,
            source_topic: record.topic.clone(),
            source_partition: record.partition,
            source_offset: record.offset,
            key: record.key.clone(),
        };
        self.dead_letters
            .dead_letter(&letter)
            .await
            .map_err(ConsumeError::DeadLetter)?;

        delivery.dead_lettered = Some(letter.reason.clone());

        SubscriberMetrics::record_dead_lettered(kind);
        tracing::warn!(reason = %letter.reason, attempts = delivery.attempts, "Record dead-lettered");
        Ok(ProcessingOutcome::DeadLettered(letter.reason))
    }
}

/// Owns a subset of partitions and processes their records sequentially.
struct PartitionWorker {
    index: usize,
    subscriber: Arc<ChangeSubscriber>,
    state: PartitionState,
    shutdown: broadcast::Receiver<()>,
    stopping: bool,
}

impl PartitionWorker {
    async fn run(mut self, mut records: mpsc::Receiver<BusRecord>) {
        tracing::debug!(worker = self.index, "Worker started");
        while !self.stopping {
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => self.stopping = true,
                next = records.recv() => match next {
                    Some(record) => self.handle(record).await,
                    None => break,
                },
            }
        }
        tracing::debug!(worker = self.index, "Worker stopped");
    }

    /// Process one record to a final outcome, backing off between attempts.
    async fn handle(&mut self, record: BusRecord) {
        let mut delivery = self.subscriber.receive();
        loop {
            match self
                .subscriber
                .process(&record, &mut self.state, &mut delivery)
                .await
            {
                Ok(ProcessingOutcome::Retrying) => {}
                Ok(_) => return,
                Err(e) => {
                    tracing::error!(
                        worker = self.index,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Record left unacknowledged"
                    );
                }
            }

            let delay = self
                .subscriber
                .retry_policy()
                .delay_for_attempt(delivery.attempts.saturating_sub(1));
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    // Unacknowledged; redelivered after restart
                    self.stopping = true;
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Runs a [`ChangeSubscriber`] over a consumer-group subscription.
pub struct SubscriberPool {
    bus: Arc<dyn EventBus>,
    subscriber: Arc<ChangeSubscriber>,
    topic: String,
    group: String,
    workers: usize,
    buffer: usize,
    reconnect_delay: Duration,
}

impl SubscriberPool {
    /// Pool of four workers consuming `topic` as `group`.
    #[must_use]
    pub fn new(
        bus: Arc<dyn EventBus>,
        subscriber: Arc<ChangeSubscriber>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            subscriber,
            topic: topic.into(),
            group: group.into(),
            workers: 4,
            buffer: 64,
            reconnect_delay: Duration::from_secs(5),
        }
    }

    /// Set the number of workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set how many records may queue for one worker.
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Set the pause before subscribing again after the stream ended.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Worker that owns `partition`.
    #[must_use]
    pub fn worker_for(&self, partition: i32) -> usize {
        usize::try_from(partition.unsigned_abs()).unwrap_or(0) % self.workers
    }

    /// Consume until `shutdown` fires.
    ///
    /// On shutdown no further records are pulled, every worker finishes the
    /// record in hand, and records still queued stay unacknowledged.
    ///
    /// # Errors
    ///
    /// Returns a non-transient subscription error (bad topic, for example).
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), EventBusError> {
        let (senders, handles) = self.spawn_workers(&shutdown);
        tracing::info!(
            topic = %self.topic,
            group = %self.group,
            workers = self.workers,
            "Subscriber pool started"
        );

        let result = self.pump(&mut shutdown, &senders).await;

        drop(senders);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        tracing::info!(topic = %self.topic, group = %self.group, "Subscriber pool stopped");
        result
    }

    fn spawn_workers(
        &self,
        shutdown: &broadcast::Receiver<()>,
    ) -> (Vec<mpsc::Sender<BusRecord>>, Vec<JoinHandle<()>>) {
        (0..self.workers)
            .map(|index| {
                let (tx, rx) = mpsc::channel(self.buffer);
                let worker = PartitionWorker {
                    index,
                    subscriber: Arc::clone(&self.subscriber),
                    state: PartitionState::default(),
                    shutdown: shutdown.resubscribe(),
                    stopping: false,
                };
                (tx, tokio::spawn(worker.run(rx)))
            })
            .unzip()
    }

    /// Subscribe, route records to workers, and resubscribe when the stream ends.
    async fn pump(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
        senders: &[mpsc::Sender<BusRecord>],
    ) -> Result<(), EventBusError> {
        loop {
            let subscribed = tokio::select! {
                biased;
                _ = shutdown.recv() => return Ok(()),
                subscribed = self.bus.subscribe(&[self.topic.as_str()], &self.group) => subscribed,
            };

            match subscribed {
                Ok(mut stream) => {
                    tracing::info!(topic = %self.topic, "Subscribed to event bus");
                    loop {
                        tokio::select! {
                            biased;
                            _ = shutdown.recv() => return Ok(()),
                            next = stream.next() => match next {
                                Some(Ok(record)) => {
                                    let worker = self.worker_for(record.partition);
                                    if senders[worker].send(record).await.is_err() {
                                        tracing::error!(worker, "Worker is gone, stopping");
                                        return Ok(());
                                    }
                                }
                                Some(Err(e)) => {
                                    tracing::error!(error = %e, "Error receiving record from stream");
                                }
                                None => {
                                    tracing::warn!("Event stream ended");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) if !e.is_transient() => {
                    tracing::error!(error = %e, "Subscription refused");
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to subscribe to event bus");
                }
            }

            tracing::warn!("Reconnecting in {:?}", self.reconnect_delay);
            tokio::select! {
                biased;
                _ = shutdown.recv() => return Ok(()),
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }
}
