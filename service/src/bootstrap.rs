//! Wiring of the two services from configuration and collaborators.
//!
//! Infrastructure (database pool, bus client) is created by the binaries;
//! everything here takes trait objects so tests can assemble the same graph
//! on in-memory fakes.

use crate::config::{Config, DeadLetterStore};
use baggage_tracker_core::environment::Clock;
use baggage_tracker_core::event_bus::EventBus;
use baggage_tracker_core::store::{
    BaggageRepository, DeadLetterSink, NotificationStore, Outbox, StoreError,
};
use baggage_tracker_postgres::PostgresDeadLetterQueue;
use baggage_tracker_runtime::baggage::BaggageService;
use baggage_tracker_runtime::dead_letter::BusDeadLetterSink;
use baggage_tracker_runtime::outbox::OutboxDispatcher;
use baggage_tracker_runtime::passenger::PassengerService;
use baggage_tracker_runtime::publisher::ChangePublisher;
use baggage_tracker_runtime::subscriber::{ChangeSubscriber, SubscriberPool};
use sqlx::PgPool;
use std::sync::Arc;

/// Baggage side: the command service and the outbox dispatcher behind it.
pub struct BaggageNode {
    /// Status transitions, publishing eagerly
    pub service: Arc<BaggageService>,
    /// Publishes whatever eager publishing left behind
    pub dispatcher: OutboxDispatcher,
}

impl BaggageNode {
    /// Assemble the baggage side around one publisher.
    #[must_use]
    pub fn assemble(
        config: &Config,
        repository: Arc<dyn BaggageRepository>,
        outbox: Arc<dyn Outbox>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let publisher = Arc::new(
            ChangePublisher::new(bus, config.channels.baggage_state_change.as_str())
                .with_retry_policy(config.retry_policy()),
        );
        let service = Arc::new(BaggageService::new(
            repository,
            Arc::clone(&outbox),
            Arc::clone(&publisher),
            clock,
        ));
        let dispatcher = OutboxDispatcher::new(outbox, publisher)
            .with_batch_size(config.outbox.batch_size)
            .with_poll_interval(config.outbox_poll_interval());

        Self {
            service,
            dispatcher,
        }
    }
}

/// Assemble the passenger side: notifications, subscriber and worker pool.
#[must_use]
pub fn passenger_pool(
    config: &Config,
    notifications: Arc<dyn NotificationStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
) -> SubscriberPool {
    let passengers = Arc::new(PassengerService::new(notifications, Arc::clone(&clock)));
    let subscriber = ChangeSubscriber::new(passengers, dead_letters, clock)
        .with_retry_policy(config.retry_policy());

    SubscriberPool::new(
        bus,
        Arc::new(subscriber),
        config.channels.baggage_state_change.as_str(),
        config.bus.consumer_group.as_str(),
    )
    .with_workers(config.subscriber.workers)
}

/// The configured dead-letter destination.
#[must_use]
pub fn dead_letter_sink(
    config: &Config,
    bus: Arc<dyn EventBus>,
    pool: &PgPool,
) -> Arc<dyn DeadLetterSink> {
    match config.subscriber.dead_letter_store {
        DeadLetterStore::Topic => Arc::new(BusDeadLetterSink::new(
            bus,
            config.channels.baggage_state_change_dlq.as_str(),
        )),
        DeadLetterStore::Table => Arc::new(PostgresDeadLetterQueue::new(pool.clone())),
    }
}

/// Connect to `PostgreSQL` and apply migrations.
///
/// # Errors
///
/// Returns a [`StoreError`] if the database is unreachable or a migration fails.
pub async fn connect_database(config: &Config) -> Result<PgPool, StoreError> {
    tracing::info!(max_connections = config.postgres.max_connections, "Connecting to database...");
    let pool =
        baggage_tracker_postgres::connect(&config.postgres.url, config.postgres.max_connections)
            .await?;
    baggage_tracker_postgres::migrate(&pool).await?;
    tracing::info!("Database ready");
    Ok(pool)
}
