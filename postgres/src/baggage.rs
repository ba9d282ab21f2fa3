//! Baggage rows and their outbox.

use crate::{attempts_from_db, store_error};
use baggage_tracker_core::baggage::{Baggage, NewBaggage, StatusChange};
use baggage_tracker_core::event::BaggageStateChangeEvent;
use baggage_tracker_core::status::BaggageStatus;
use baggage_tracker_core::store::{BaggageRepository, Outbox, OutboxEntry, StoreError, StoreFuture};
use baggage_tracker_core::types::{BaggageId, EventId, PassengerId};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

/// `PostgreSQL` implementation of [`BaggageRepository`] and [`Outbox`].
///
/// A status change and its outbox row are written in one transaction; the
/// update carries a `status = previous` guard so two concurrent transitions
/// of the same bag cannot both commit.
#[derive(Clone)]
pub struct PostgresBaggageRepository {
    pool: PgPool,
}

impl PostgresBaggageRepository {
    /// Repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_baggage(row: &sqlx::postgres::PgRow) -> Result<Baggage, StoreError> {
        let status: String = row.try_get("status").map_err(store_error)?;
        Ok(Baggage {
            id: BaggageId::new(row.try_get("id").map_err(store_error)?),
            passenger_id: PassengerId::new(row.try_get("passenger_id").map_err(store_error)?),
            weight: row.try_get("weight").map_err(store_error)?,
            status: status
                .parse::<BaggageStatus>()
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
        })
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry, StoreError> {
        let Json(event): Json<BaggageStateChangeEvent> = row.try_get("event").map_err(store_error)?;
        Ok(OutboxEntry {
            event,
            attempts: attempts_from_db(row.try_get("attempts").map_err(store_error)?),
            last_error: row.try_get("last_error").map_err(store_error)?,
            enqueued_at: row.try_get("enqueued_at").map_err(store_error)?,
        })
    }
}

impl BaggageRepository for PostgresBaggageRepository {
    fn insert(&self, baggage: NewBaggage) -> StoreFuture<'_, Baggage> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                INSERT INTO baggage (passenger_id, weight, status)
                VALUES ($1, $2, $3)
                RETURNING id, passenger_id, weight, status
                ",
            )
            .bind(baggage.passenger_id.get())
            .bind(baggage.weight)
            .bind(BaggageStatus::Registered.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;

            Self::row_to_baggage(&row)
        })
    }

    fn find(&self, id: BaggageId) -> StoreFuture<'_, Option<Baggage>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT id, passenger_id, weight, status FROM baggage WHERE id = $1")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

            row.as_ref().map(Self::row_to_baggage).transpose()
        })
    }

    fn list_for_passenger(&self, passenger_id: PassengerId) -> StoreFuture<'_, Vec<Baggage>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, passenger_id, weight, status
                FROM baggage
                WHERE passenger_id = $1
                ORDER BY id ASC
                ",
            )
            .bind(passenger_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

            rows.iter().map(Self::row_to_baggage).collect()
        })
    }

    fn commit_transition<'a>(
        &'a self,
        change: &'a StatusChange,
        event: &'a BaggageStateChangeEvent,
    ) -> StoreFuture<'a, Baggage> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(store_error)?;

            let updated = sqlx::query(
                r"
                UPDATE baggage
                SET status = $1, updated_at = now()
                WHERE id = $2 AND status = $3
                RETURNING id, passenger_id, weight, status
                ",
            )
            .bind(change.new.as_str())
            .bind(change.baggage_id.get())
            .bind(change.previous.map(BaggageStatus::as_str))
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_error)?;

            let Some(row) = updated else {
                let current: Option<(String,)> =
                    sqlx::query_as("SELECT status FROM baggage WHERE id = $1")
                        .bind(change.baggage_id.get())
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(store_error)?;
                tx.rollback().await.map_err(store_error)?;

                return Err(match current {
                    Some((status,)) => StoreError::Conflict(format!(
                        "baggage {} is {status}, expected {}",
                        change.baggage_id,
                        change.previous.map_or("none", BaggageStatus::as_str)
                    )),
                    None => StoreError::NotFound(format!("baggage {}", change.baggage_id)),
                });
            };
            let baggage = Self::row_to_baggage(&row)?;

            sqlx::query(
                r"
                INSERT INTO baggage_outbox (event_id, baggage_id, event, enqueued_at)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(*event.event_id.as_uuid())
            .bind(event.baggage_id.get())
            .bind(Json(event))
            .bind(event.occurred_at)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

            tx.commit().await.map_err(store_error)?;

            tracing::debug!(
                baggage_id = %change.baggage_id,
                event_id = %event.event_id,
                from = ?change.previous,
                to = %change.new,
                "Status change committed with outbox row"
            );
            Ok(baggage)
        })
    }
}

impl Outbox for PostgresBaggageRepository {
    fn pending(&self, limit: usize) -> StoreFuture<'_, Vec<OutboxEntry>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = sqlx::query(
                r"
                SELECT event, attempts, last_error, enqueued_at
                FROM baggage_outbox
                ORDER BY seq ASC
                LIMIT $1
                ",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

            rows.iter().map(Self::row_to_entry).collect()
        })
    }

    fn pending_for_baggage(&self, baggage_id: BaggageId) -> StoreFuture<'_, Vec<OutboxEntry>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT event, attempts, last_error, enqueued_at
                FROM baggage_outbox
                WHERE baggage_id = $1
                ORDER BY seq ASC
                ",
            )
            .bind(baggage_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

            rows.iter().map(Self::row_to_entry).collect()
        })
    }

    fn remove<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM baggage_outbox WHERE event_id = $1")
                .bind(*event_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(store_error)?;
            Ok(())
        })
    }

    fn record_failure<'a>(&'a self, event_id: &'a EventId, error: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                UPDATE baggage_outbox
                SET attempts = attempts + 1, last_error = $2
                WHERE event_id = $1
                ",
            )
            .bind(*event_id.as_uuid())
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
            Ok(())
        })
    }
}
