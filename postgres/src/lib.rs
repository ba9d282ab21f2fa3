//! `PostgreSQL` storage for the baggage tracker.
//!
//! Implements the storage contracts from `baggage-tracker-core` with sqlx:
//!
//! - [`PostgresBaggageRepository`]: baggage rows plus the outbox, written in
//!   one transaction with a status guard
//! - [`PostgresNotificationStore`]: notifications with a unique
//!   `source_event_id`
//! - [`PostgresDeadLetterQueue`]: dead letters kept for operator review
//!
//! # Example
//!
//! ```no_run
//! use baggage_tracker_postgres::{connect, migrate, PostgresBaggageRepository};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/baggage", 10).await?;
//! migrate(&pool).await?;
//! let repository = PostgresBaggageRepository::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod baggage;
mod dead_letter_queue;
mod notifications;

pub use baggage::PostgresBaggageRepository;
pub use dead_letter_queue::{DeadLetterStatus, PostgresDeadLetterQueue, StoredDeadLetter};
pub use notifications::PostgresNotificationStore;

use baggage_tracker_core::store::StoreError;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the database cannot be reached.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))
}

/// Apply the bundled migrations.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Classify a sqlx error for the retry logic upstream.
pub(crate) fn store_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(error.to_string()),
        sqlx::Error::RowNotFound => StoreError::NotFound(error.to_string()),
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(error.to_string())
        }
        sqlx::Error::Database(db) if db.code().as_deref().is_some_and(is_transient_sqlstate) => {
            StoreError::Unavailable(error.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(error.to_string())
        }
        _ => StoreError::Database(error.to_string()),
    }
}

/// Server-reported failures that clear up once the database is back:
/// connection exceptions (class `08`), shutdown and startup (`57P01`-`57P03`),
/// too many connections (`53300`), serialization failures and deadlocks.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || matches!(code, "57P01" | "57P02" | "57P03" | "53300" | "40001" | "40P01")
}

/// Convert a stored counter back to the domain type.
pub(crate) fn attempts_from_db(attempts: i32) -> u32 {
    u32::try_from(attempts).unwrap_or(0)
}

/// Convert a domain counter for storage, saturating.
pub(crate) fn attempts_to_db(attempts: u32) -> i32 {
    i32::try_from(attempts).unwrap_or(i32::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::fmt;

    /// Server error carrying only a SQLSTATE.
    #[derive(Debug)]
    struct ServerError(&'static str);

    impl fmt::Display for ServerError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "server error {}", self.0)
        }
    }

    impl std::error::Error for ServerError {}

    impl DatabaseError for ServerError {
        fn message(&self) -> &str {
            "server error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn server_error(code: &'static str) -> StoreError {
        store_error(sqlx::Error::Database(Box::new(ServerError(code))))
    }

    #[test]
    fn failover_and_overload_codes_are_transient() {
        for code in ["08000", "08003", "08006", "57P01", "57P02", "57P03", "53300", "40001", "40P01"] {
            let err = server_error(code);
            assert!(
                matches!(err, StoreError::Unavailable(_)),
                "SQLSTATE {code} mapped to {err:?}"
            );
            assert!(err.is_transient(), "SQLSTATE {code}");
        }
    }

    #[test]
    fn unique_violation_is_a_conflict() {
        assert!(matches!(server_error(UNIQUE_VIOLATION), StoreError::Conflict(_)));
    }

    #[test]
    fn other_server_errors_are_permanent() {
        for code in ["23502", "42P01", "22P02"] {
            let err = server_error(code);
            assert!(matches!(err, StoreError::Database(_)), "SQLSTATE {code} mapped to {err:?}");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn connection_problems_are_transient() {
        assert!(store_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(store_error(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn missing_rows_are_not_found() {
        assert!(matches!(
            store_error(sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn protocol_errors_are_permanent() {
        let err = store_error(sqlx::Error::Protocol("bad message".into()));
        assert!(matches!(err, StoreError::Database(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn attempt_counters_saturate() {
        assert_eq!(attempts_from_db(-1), 0);
        assert_eq!(attempts_from_db(3), 3);
        assert_eq!(attempts_to_db(u32::MAX), i32::MAX);
    }
}
