//! In-memory storage fakes.
//!
//! - [`InMemoryBaggageRepository`]: baggage rows and the outbox behind one lock,
//!   so a status change and its publish intent commit together
//! - [`InMemoryNotificationStore`]: notifications with a unique source event index
//! - [`InMemoryDeadLetterSink`]: bounded list of dead letters
//!
//! Every fake can be told to fail its next operations with
//! [`StoreError::Unavailable`] to exercise retry paths.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use baggage_tracker_core::baggage::{Baggage, NewBaggage, StatusChange};
use baggage_tracker_core::dead_letter::DeadLetter;
use baggage_tracker_core::event::BaggageStateChangeEvent;
use baggage_tracker_core::notification::Notification;
use baggage_tracker_core::status::BaggageStatus;
use baggage_tracker_core::store::{
    BaggageRepository, DeadLetterSink, InsertOutcome, NotificationStore, Outbox, OutboxEntry,
    StoreError, StoreFuture,
};
use baggage_tracker_core::types::{BaggageId, EventId, PassengerId};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Counts down injected failures.
#[derive(Debug, Default)]
struct FaultInjector {
    remaining: AtomicUsize,
}

impl FaultInjector {
    fn arm(&self, count: usize) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> Result<(), StoreError> {
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable(format!("injected failure in {operation}")))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct BaggageTables {
    next_id: i64,
    bags: BTreeMap<BaggageId, Baggage>,
    outbox: Vec<OutboxEntry>,
}

/// Baggage rows plus outbox, committed atomically.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBaggageRepository {
    tables: Arc<Mutex<BaggageTables>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryBaggageRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations (repository and outbox alike).
    pub fn fail_next(&self, count: usize) {
        self.faults.arm(count);
    }

    /// Snapshot of the outbox, oldest first.
    #[must_use]
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.tables.lock().unwrap().outbox.clone()
    }
}

impl BaggageRepository for InMemoryBaggageRepository {
    fn insert(&self, baggage: NewBaggage) -> StoreFuture<'_, Baggage> {
        Box::pin(async move {
            self.faults.check("insert")?;
            let mut tables = self.tables.lock().unwrap();
            tables.next_id += 1;
            let bag = Baggage {
                id: BaggageId::new(tables.next_id),
                passenger_id: baggage.passenger_id,
                weight: baggage.weight,
                status: BaggageStatus::Registered,
            };
            tables.bags.insert(bag.id, bag.clone());
            Ok(bag)
        })
    }

    fn find(&self, id: BaggageId) -> StoreFuture<'_, Option<Baggage>> {
        Box::pin(async move {
            self.faults.check("find")?;
            Ok(self.tables.lock().unwrap().bags.get(&id).cloned())
        })
    }

    fn list_for_passenger(&self, passenger_id: PassengerId) -> StoreFuture<'_, Vec<Baggage>> {
        Box::pin(async move {
            self.faults.check("list_for_passenger")?;
            Ok(self
                .tables
                .lock()
                .unwrap()
                .bags
                .values()
                .filter(|bag| bag.passenger_id == passenger_id)
                .cloned()
                .collect())
        })
    }

    fn commit_transition<'a>(
        &'a self,
        change: &'a StatusChange,
        event: &'a BaggageStateChangeEvent,
    ) -> StoreFuture<'a, Baggage> {
        Box::pin(async move {
            self.faults.check("commit_transition")?;
            let mut tables = self.tables.lock().unwrap();
            let bag = tables
                .bags
                .get_mut(&change.baggage_id)
                .ok_or_else(|| StoreError::NotFound(format!("baggage {}", change.baggage_id)))?;
            if Some(bag.status) != change.previous {
                return Err(StoreError::Conflict(format!(
                    "baggage {} is {} not {:?}",
                    change.baggage_id, bag.status, change.previous
                )));
            }
            bag.status = change.new;
            let updated = bag.clone();
            tables
                .outbox
                .push(OutboxEntry::new(event.clone(), event.occurred_at));
            Ok(updated)
        })
    }
}

impl Outbox for InMemoryBaggageRepository {
    fn pending(&self, limit: usize) -> StoreFuture<'_, Vec<OutboxEntry>> {
        Box::pin(async move {
            self.faults.check("pending")?;
            Ok(self
                .tables
                .lock()
                .unwrap()
                .outbox
                .iter()
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn pending_for_baggage(&self, baggage_id: BaggageId) -> StoreFuture<'_, Vec<OutboxEntry>> {
        Box::pin(async move {
            self.faults.check("pending_for_baggage")?;
            Ok(self
                .tables
                .lock()
                .unwrap()
                .outbox
                .iter()
                .filter(|entry| entry.event.baggage_id == baggage_id)
                .cloned()
                .collect())
        })
    }

    fn remove<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.faults.check("remove")?;
            self.tables
                .lock()
                .unwrap()
                .outbox
                .retain(|entry| entry.event.event_id != *event_id);
            Ok(())
        })
    }

    fn record_failure<'a>(&'a self, event_id: &'a EventId, error: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.faults.check("record_failure")?;
            let mut tables = self.tables.lock().unwrap();
            if let Some(entry) = tables
                .outbox
                .iter_mut()
                .find(|entry| entry.event.event_id == *event_id)
            {
                entry.attempts += 1;
                entry.last_error = Some(error.to_string());
            }
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct NotificationTable {
    rows: Vec<Notification>,
    by_event: HashSet<EventId>,
}

/// Notification store with a unique index on `source_event_id`.
#[derive(Clone, Debug, Default)]
pub struct InMemoryNotificationStore {
    table: Arc<Mutex<NotificationTable>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryNotificationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations.
    pub fn fail_next(&self, count: usize) {
        self.faults.arm(count);
    }

    /// Every stored notification in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<Notification> {
        self.table.lock().unwrap().rows.clone()
    }

    /// Number of stored notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().unwrap().rows.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn exists_for_event<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.faults.check("exists_for_event")?;
            Ok(self.table.lock().unwrap().by_event.contains(event_id))
        })
    }

    fn insert_if_absent<'a>(&'a self, notification: &'a Notification) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move {
            self.faults.check("insert_if_absent")?;
            let mut table = self.table.lock().unwrap();
            if !table.by_event.insert(notification.source_event_id) {
                return Ok(InsertOutcome::AlreadyPresent);
            }
            table.rows.push(notification.clone());
            Ok(InsertOutcome::Inserted)
        })
    }

    fn list_for_passenger(&self, passenger_id: PassengerId) -> StoreFuture<'_, Vec<Notification>> {
        Box::pin(async move {
            self.faults.check("list_for_passenger")?;
            Ok(self
                .table
                .lock()
                .unwrap()
                .rows
                .iter()
                .filter(|n| n.passenger_id == passenger_id)
                .cloned()
                .collect())
        })
    }
}

/// Bounded in-memory dead-letter destination; drops the oldest when full.
#[derive(Clone, Debug)]
pub struct InMemoryDeadLetterSink {
    letters: Arc<Mutex<VecDeque<DeadLetter>>>,
    max_size: usize,
    faults: Arc<FaultInjector>,
}

impl InMemoryDeadLetterSink {
    /// Sink holding up to `max_size` letters.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            letters: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
            faults: Arc::new(FaultInjector::default()),
        }
    }

    /// Fail the next `count` hand-overs.
    pub fn fail_next(&self, count: usize) {
        self.faults.arm(count);
    }

    /// Letters received, oldest first.
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().iter().cloned().collect()
    }

    /// Number of letters held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.letters.lock().unwrap().len()
    }

    /// Whether no letters were received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryDeadLetterSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.faults.check("dead_letter")?;
            let mut letters = self.letters.lock().unwrap();
            if letters.len() >= self.max_size {
                letters.pop_front();
                tracing::warn!(max_size = self.max_size, "Dead-letter sink full, dropping oldest");
            }
            letters.push_back(letter.clone());
            Ok(())
        })
    }
}
