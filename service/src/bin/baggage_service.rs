//! Baggage service.
//!
//! Owns the baggage table and its outbox, and keeps the
//! `baggage-state-change` topic in step with committed transitions.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: `PostgreSQL` connection string
//! - `BUS_BROKERS`: Kafka/Redpanda bootstrap servers
//! - `CHANNEL_BAGGAGE_STATE_CHANGE`: topic for status changes
//! - `BAGGAGE_RECONCILE_ONCE`: publish the outbox backlog once and exit
//! - `METRICS_ADDR`: Prometheus listener (default `0.0.0.0:9090`)
//! - `RUST_LOG`: log filter (default `baggage_tracker=info`)

use anyhow::Context;
use baggage_tracker::bootstrap::{BaggageNode, connect_database};
use baggage_tracker::config::Config;
use baggage_tracker::shutdown::spawn_shutdown_listener;
use baggage_tracker::telemetry::{init_tracing, start_metrics};
use baggage_tracker_core::environment::SystemClock;
use baggage_tracker_postgres::PostgresBaggageRepository;
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
        brokers = %config.bus.brokers,
        "Starting baggage service"
    );

    let _metrics = start_metrics(&config)?;

    let pool = connect_database(&config).await?;
    let repository = Arc::new(PostgresBaggageRepository::new(pool));
    let bus = Arc::new(RedpandaEventBus::new(&config.bus.brokers)?);

    let node = BaggageNode::assemble(
        &config,
        Arc::clone(&repository),
        repository,
        bus,
        Arc::new(SystemClock),
    );

    if config.outbox.reconcile_once {
        let report = node.dispatcher.dispatch_pending().await?;
        tracing::info!(
            dispatched = report.dispatched,
            failed = report.failed,
            skipped = report.skipped,
            "Reconciliation finished"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    spawn_shutdown_listener(shutdown_tx);

    node.dispatcher.run(shutdown_rx).await;

    tracing::info!("Baggage service stopped");
    Ok(())
}
