//! Storage contracts for both subsystems.
//!
//! The baggage subsystem owns [`BaggageRepository`] and [`Outbox`]; the
//! passenger subsystem owns [`NotificationStore`] and a [`DeadLetterSink`].
//! Postgres and in-memory implementations live in their own crates.

use crate::baggage::{Baggage, NewBaggage, StatusChange};
use crate::dead_letter::DeadLetter;
use crate::event::BaggageStateChangeEvent;
use crate::notification::Notification;
use crate::types::{BaggageId, EventId, PassengerId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from storage backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached. Worth retrying.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A guarded write lost a race with a concurrent writer.
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// The record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the operation may succeed if tried again unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Boxed future returned by the storage traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Result of an insert-if-absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was written.
    Inserted,
    /// A row with the same key already existed; nothing was written.
    AlreadyPresent,
}

/// A publish intent recorded together with a status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxEntry {
    /// The event to publish. Its id is fixed when the intent is recorded.
    pub event: BaggageStateChangeEvent,
    /// Failed publish attempts so far.
    pub attempts: u32,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
    /// When the intent was recorded.
    pub enqueued_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// A fresh intent for `event`.
    #[must_use]
    pub const fn new(event: BaggageStateChangeEvent, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            event,
            attempts: 0,
            last_error: None,
            enqueued_at,
        }
    }
}

/// Persistence for baggage rows.
pub trait BaggageRepository: Send + Sync {
    /// Persist a new bag in status `REGISTERED` and return it with its id.
    fn insert(&self, baggage: NewBaggage) -> StoreFuture<'_, Baggage>;

    /// Look a bag up by id.
    fn find(&self, id: BaggageId) -> StoreFuture<'_, Option<Baggage>>;

    /// All bags of a passenger, by id.
    fn list_for_passenger(&self, passenger_id: PassengerId) -> StoreFuture<'_, Vec<Baggage>>;

    /// Commit `change` and record `event` in the outbox, atomically.
    ///
    /// The update only applies while the stored status still equals
    /// `change.previous`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for an unknown bag; [`StoreError::Conflict`]
    /// when the stored status moved on since the change was computed.
    fn commit_transition<'a>(
        &'a self,
        change: &'a StatusChange,
        event: &'a BaggageStateChangeEvent,
    ) -> StoreFuture<'a, Baggage>;
}

/// Un-sent publish intents.
pub trait Outbox: Send + Sync {
    /// Up to `limit` pending entries, oldest first.
    fn pending(&self, limit: usize) -> StoreFuture<'_, Vec<OutboxEntry>>;

    /// Every pending entry for one bag, oldest first.
    fn pending_for_baggage(&self, baggage_id: BaggageId) -> StoreFuture<'_, Vec<OutboxEntry>>;

    /// Delete the entry once the bus acknowledged it. Unknown ids are ignored.
    fn remove<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, ()>;

    /// Count a failed attempt and remember its error.
    fn record_failure<'a>(&'a self, event_id: &'a EventId, error: &'a str) -> StoreFuture<'a, ()>;
}

/// Persistence for passenger notifications.
///
/// Must enforce uniqueness of `source_event_id`; that constraint is the final
/// idempotency backstop when two workers race on the same event.
pub trait NotificationStore: Send + Sync {
    /// Whether a notification already exists for `event_id`.
    fn exists_for_event<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, bool>;

    /// Insert unless a notification with the same source event exists.
    fn insert_if_absent<'a>(&'a self, notification: &'a Notification) -> StoreFuture<'a, InsertOutcome>;

    /// A passenger's notifications in creation order.
    fn list_for_passenger(&self, passenger_id: PassengerId) -> StoreFuture<'_, Vec<Notification>>;
}

/// Destination for records that cannot be processed.
pub trait DeadLetterSink: Send + Sync {
    /// Hand a dead letter over for operator inspection.
    fn dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> StoreFuture<'a, ()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_transient() {
        assert!(StoreError::Unavailable("timeout".into()).is_transient());
        assert!(!StoreError::Conflict("x".into()).is_transient());
        assert!(!StoreError::Database("x".into()).is_transient());
    }
}
