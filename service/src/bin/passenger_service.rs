//! Passenger service.
//!
//! Consumes `baggage-state-change` and records one notification per event.
//! Records that cannot be processed go to the configured dead-letter store.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: `PostgreSQL` connection string
//! - `BUS_BROKERS`: Kafka/Redpanda bootstrap servers
//! - `CONSUMER_GROUP`: consumer group id (default `passenger-service`)
//! - `SUBSCRIBER_WORKERS`: partition workers (default 4)
//! - `DEAD_LETTER_STORE`: `topic` or `table` (default `topic`)
//! - `METRICS_ADDR`: Prometheus listener (default `0.0.0.0:9090`)
//! - `RUST_LOG`: log filter (default `baggage_tracker=info`)

use anyhow::Context;
use baggage_tracker::bootstrap::{connect_database, dead_letter_sink, passenger_pool};
use baggage_tracker::config::Config;
use baggage_tracker::shutdown::spawn_shutdown_listener;
use baggage_tracker::telemetry::{init_tracing, start_metrics};
use baggage_tracker_core::environment::SystemClock;
use baggage_tracker_postgres::PostgresNotificationStore;
use baggage_tracker_redpanda::RedpandaEventBus;
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    tracing::info!(
        topic = %config.channels.baggage_state_change,
        group = %config.bus.consumer_group,
        workers = config.subscriber.workers,
        dead_letters = %config.subscriber.dead_letter_store,
        "Starting passenger service"
    );

    let _metrics = start_metrics(&config)?;

    let pool = connect_database(&config).await?;
    let bus = Arc::new(
        RedpandaEventBus::builder()
            .brokers(config.bus.brokers.as_str())
            .build()?,
    );

    let dead_letters = dead_letter_sink(&config, Arc::clone(&bus), &pool);
    let notifications = Arc::new(PostgresNotificationStore::new(pool));
    let subscribers = passenger_pool(
        &config,
        notifications,
        dead_letters,
        bus,
        Arc::new(SystemClock),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    spawn_shutdown_listener(shutdown_tx);

    subscribers
        .run(shutdown_rx)
        .await
        .context("Subscriber pool failed")?;

    tracing::info!("Passenger service stopped");
    Ok(())
}
