//! Passenger notifications.

use crate::store_error;
use baggage_tracker_core::notification::Notification;
use baggage_tracker_core::store::{InsertOutcome, NotificationStore, StoreError, StoreFuture};
use baggage_tracker_core::types::{BaggageId, EventId, NotificationId, PassengerId};
use sqlx::{PgPool, Row};

/// `PostgreSQL` implementation of [`NotificationStore`].
///
/// `insert_if_absent` relies on the unique constraint on `source_event_id`
/// with `ON CONFLICT DO NOTHING`, so racing workers never produce two rows
/// for one event.
#[derive(Clone)]
pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    /// Store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_notification(row: &sqlx::postgres::PgRow) -> Result<Notification, StoreError> {
        Ok(Notification {
            notification_id: NotificationId::from_uuid(
                row.try_get("notification_id").map_err(store_error)?,
            ),
            passenger_id: PassengerId::new(row.try_get("passenger_id").map_err(store_error)?),
            baggage_id: BaggageId::new(row.try_get("baggage_id").map_err(store_error)?),
            message: row.try_get("message").map_err(store_error)?,
            created_at: row.try_get("created_at").map_err(store_error)?,
            source_event_id: EventId::from_uuid(row.try_get("source_event_id").map_err(store_error)?),
        })
    }
}

impl NotificationStore for PostgresNotificationStore {
    fn exists_for_event<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS (SELECT 1 FROM notifications WHERE source_event_id = $1)",
            )
            .bind(*event_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
            Ok(exists)
        })
    }

    fn insert_if_absent<'a>(&'a self, notification: &'a Notification) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO notifications (
                    notification_id, passenger_id, baggage_id, message, created_at, source_event_id
                ) VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (source_event_id) DO NOTHING
                ",
            )
            .bind(*notification.notification_id.as_uuid())
            .bind(notification.passenger_id.get())
            .bind(notification.baggage_id.get())
            .bind(&notification.message)
            .bind(notification.created_at)
            .bind(*notification.source_event_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

            if result.rows_affected() == 1 {
                Ok(InsertOutcome::Inserted)
            } else {
                tracing::debug!(
                    source_event_id = %notification.source_event_id,
                    "Notification already stored"
                );
                Ok(InsertOutcome::AlreadyPresent)
            }
        })
    }

    fn list_for_passenger(&self, passenger_id: PassengerId) -> StoreFuture<'_, Vec<Notification>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT notification_id, passenger_id, baggage_id, message, created_at, source_event_id
                FROM notifications
                WHERE passenger_id = $1
                ORDER BY created_at ASC, seq ASC
                ",
            )
            .bind(passenger_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

            rows.iter().map(Self::row_to_notification).collect()
        })
    }
}
