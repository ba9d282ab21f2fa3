//! Passenger side: notification records for a passenger.

use baggage_tracker_core::environment::Clock;
use baggage_tracker_core::event::BaggageStateChangeEvent;
use baggage_tracker_core::notification::{Notification, NotificationBuilder};
use baggage_tracker_core::store::{InsertOutcome, NotificationStore, StoreError};
use baggage_tracker_core::types::{EventId, NotificationId, PassengerId};
use std::sync::Arc;
use thiserror::Error;

/// Errors from [`PassengerService`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PassengerServiceError {
    /// The notification belongs to someone else.
    #[error("Notification for passenger {actual} cannot be added to passenger {expected}")]
    PassengerMismatch {
        /// Passenger the caller asked for
        expected: PassengerId,
        /// Passenger on the notification
        actual: PassengerId,
    },

    /// The notification store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PassengerServiceError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::PassengerMismatch { .. } => false,
        }
    }
}

/// Owns a passenger's notifications.
#[derive(Clone)]
pub struct PassengerService {
    store: Arc<dyn NotificationStore>,
    builder: NotificationBuilder,
    clock: Arc<dyn Clock>,
}

impl PassengerService {
    /// Create a service over `store`, stamping notifications with `clock`.
    #[must_use]
    pub fn new(store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            builder: NotificationBuilder::new(),
            clock,
        }
    }

    /// Build the notification for `event` with a fresh id.
    #[must_use]
    pub fn notification_for(&self, event: &BaggageStateChangeEvent) -> Notification {
        self.builder
            .build(event, NotificationId::generate(), self.clock.now())
    }

    /// Whether `event_id` already produced a notification.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn has_notification_for_event(&self, event_id: &EventId) -> Result<bool, StoreError> {
        self.store.exists_for_event(event_id).await
    }

    /// Record `notification` for `passenger_id`, at most once per source event.
    ///
    /// # Errors
    ///
    /// [`PassengerServiceError::PassengerMismatch`] when the notification is
    /// addressed to another passenger; store errors otherwise.
    pub async fn add_notification_for_passenger(
        &self,
        passenger_id: PassengerId,
        notification: &Notification,
    ) -> Result<InsertOutcome, PassengerServiceError> {
        if notification.passenger_id != passenger_id {
            return Err(PassengerServiceError::PassengerMismatch {
                expected: passenger_id,
                actual: notification.passenger_id,
            });
        }

        let outcome = self.store.insert_if_absent(notification).await?;
        tracing::debug!(
            %passenger_id,
            notification_id = %notification.notification_id,
            source_event_id = %notification.source_event_id,
            ?outcome,
            "Notification stored"
        );
        Ok(outcome)
    }

    /// A passenger's notifications in creation order.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn notifications_for_passenger(
        &self,
        passenger_id: PassengerId,
    ) -> Result<Vec<Notification>, StoreError> {
        self.store.list_for_passenger(passenger_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use baggage_tracker_core::baggage::Baggage;
    use baggage_tracker_core::status::BaggageStatus;
    use baggage_tracker_core::types::BaggageId;
    use baggage_tracker_testing::{InMemoryNotificationStore, test_clock};

    fn service(store: &InMemoryNotificationStore) -> PassengerService {
        PassengerService::new(Arc::new(store.clone()), Arc::new(test_clock()))
    }

    fn lost_event(passenger: i64) -> BaggageStateChangeEvent {
        let bag = Baggage {
            id: BaggageId::new(7),
            passenger_id: PassengerId::new(passenger),
            weight: 12,
            status: BaggageStatus::Loaded,
        };
        let change = bag.apply(BaggageStatus::Lost).unwrap();
        BaggageStateChangeEvent::from_change(EventId::generate(), &change, test_clock().now())
    }

    #[tokio::test]
    async fn adds_notification_once_per_event() {
        let store = InMemoryNotificationStore::new();
        let service = service(&store);
        let event = lost_event(100);

        let first = service.notification_for(&event);
        let again = service.notification_for(&event);
        assert_ne!(first.notification_id, again.notification_id);

        let passenger = PassengerId::new(100);
        assert_eq!(
            service.add_notification_for_passenger(passenger, &first).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            service.add_notification_for_passenger(passenger, &again).await.unwrap(),
            InsertOutcome::AlreadyPresent
        );

        let stored = service.notifications_for_passenger(passenger).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0].message,
            "Your baggage has been reported lost; our team will contact you. Last known status: loaded."
        );
        assert_eq!(stored[0].created_at, test_clock().now());
        assert!(service.has_notification_for_event(&event.event_id).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_notification_for_another_passenger() {
        let store = InMemoryNotificationStore::new();
        let service = service(&store);
        let notification = service.notification_for(&lost_event(100));

        let err = service
            .add_notification_for_passenger(PassengerId::new(200), &notification)
            .await
            .unwrap_err();
        assert!(matches!(err, PassengerServiceError::PassengerMismatch { .. }));
        assert!(!err.is_transient());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn store_outage_is_transient() {
        let store = InMemoryNotificationStore::new();
        let service = service(&store);
        let notification = service.notification_for(&lost_event(100));
        store.fail_next(1);

        let err = service
            .add_notification_for_passenger(PassengerId::new(100), &notification)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
