//! Dead Letter Queue table for records the change subscriber gave up on.
//!
//! Letters are kept with their source position so operators can inspect
//! them, fix the cause and mark them resolved or discarded.

use crate::{attempts_from_db, attempts_to_db, store_error};
use baggage_tracker_core::dead_letter::DeadLetter;
use baggage_tracker_core::store::{DeadLetterSink, StoreError, StoreFuture};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Review status of a dead letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Awaiting investigation
    Pending,
    /// Cause fixed, event replayed or otherwise handled
    Resolved,
    /// Permanently dropped
    Discarded,
}

impl DeadLetterStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(StoreError::Serialization(format!(
                "Invalid dead letter status: {s}"
            ))),
        }
    }
}

/// A dead letter as stored, with review metadata.
#[derive(Debug, Clone)]
pub struct StoredDeadLetter {
    /// Row id
    pub id: i64,
    /// The letter as the subscriber produced it
    pub letter: DeadLetter,
    /// When the row was written
    pub dead_lettered_at: DateTime<Utc>,
    /// Review status
    pub status: DeadLetterStatus,
    /// When it was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// What was done about it
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed [`DeadLetterSink`].
///
/// # Example
///
/// ```no_run
/// use baggage_tracker_postgres::PostgresDeadLetterQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = PostgresDeadLetterQueue::new(pool);
///
/// for stored in dlq.list_pending(100).await? {
///     println!("{} at {}:{}", stored.letter.reason, stored.letter.source_partition, stored.letter.source_offset);
///     dlq.mark_discarded(stored.id, "superseded by later status").await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresDeadLetterQueue {
    pool: PgPool,
}

impl PostgresDeadLetterQueue {
    /// Queue over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store a letter and return its row id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the insert fails.
    pub async fn add(&self, letter: &DeadLetter) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO dead_letters (
                original_event, reason, first_seen_at, attempts,
                source_topic, source_partition, source_offset, record_key
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            ",
        )
        .bind(&letter.original_event)
        .bind(&letter.reason)
        .bind(letter.first_seen_at)
        .bind(attempts_to_db(letter.attempts))
        .bind(&letter.source_topic)
        .bind(letter.source_partition)
        .bind(letter.source_offset)
        .bind(letter.key.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        tracing::warn!(
            dlq_id = id,
            source_topic = %letter.source_topic,
            source_partition = letter.source_partition,
            source_offset = letter.source_offset,
            reason = %letter.reason,
            attempts = letter.attempts,
            "Record stored in dead letter table"
        );
        metrics::counter!("dead_letters_stored_total").increment(1);

        Ok(id)
    }

    /// Pending letters, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<StoredDeadLetter>, StoreError> {
        self.list_by_status(DeadLetterStatus::Pending, limit).await
    }

    /// Letters in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DeadLetterStatus,
        limit: usize,
    ) -> Result<Vec<StoredDeadLetter>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT
                id, original_event, reason, first_seen_at, attempts,
                source_topic, source_partition, source_offset, record_key,
                dead_lettered_at, status, resolved_at, resolved_by, resolution_notes
            FROM dead_letters
            WHERE status = $1
            ORDER BY dead_lettered_at ASC, id ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(Self::row_to_stored).collect()
    }

    /// Mark a letter resolved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE dead_letters
            SET status = 'resolved',
                resolved_at = now(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("dead letter {id}")));
        }
        tracing::info!(dlq_id = id, resolved_by = resolved_by, "Dead letter resolved");
        Ok(())
    }

    /// Mark a letter permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE dead_letters
            SET status = 'discarded',
                resolved_at = now(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("dead letter {id}")));
        }
        tracing::warn!(dlq_id = id, reason = reason, "Dead letter discarded");
        Ok(())
    }

    /// Number of letters awaiting review. Useful for health checks.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM dead_letters WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(store_error)?;
        Ok(count)
    }

    fn row_to_stored(row: &sqlx::postgres::PgRow) -> Result<StoredDeadLetter, StoreError> {
        let status: String = row.try_get("status").map_err(store_error)?;
        Ok(StoredDeadLetter {
            id: row.try_get("id").map_err(store_error)?,
            letter: DeadLetter {
                original_event: row.try_get("original_event").map_err(store_error)?,
                reason: row.try_get("reason").map_err(store_error)?,
                first_seen_at: row.try_get("first_seen_at").map_err(store_error)?,
                attempts: attempts_from_db(row.try_get("attempts").map_err(store_error)?),
                source_topic: row.try_get("source_topic").map_err(store_error)?,
                source_partition: row.try_get("source_partition").map_err(store_error)?,
                source_offset: row.try_get("source_offset").map_err(store_error)?,
                key: row.try_get("record_key").map_err(store_error)?,
            },
            dead_lettered_at: row.try_get("dead_lettered_at").map_err(store_error)?,
            status: DeadLetterStatus::parse(&status)?,
            resolved_at: row.try_get("resolved_at").map_err(store_error)?,
            resolved_by: row.try_get("resolved_by").map_err(store_error)?,
            resolution_notes: row.try_get("resolution_notes").map_err(store_error)?,
        })
    }
}

impl DeadLetterSink for PostgresDeadLetterQueue {
    fn dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.add(letter).await?;
            Ok(())
        })
    }
}
