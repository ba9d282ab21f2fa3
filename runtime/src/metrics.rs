//! Prometheus metrics for observability and monitoring.
//!
//! This module covers both subsystems:
//! - Change publisher and outbox dispatcher (baggage side)
//! - Change subscriber (passenger side)
//!
//! # Example
//!
//! ```rust,no_run
//! use baggage_tracker_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Expose metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.serve()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    fn builder() -> Result<PrometheusBuilder, MetricsError> {
        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                DURATION_BUCKETS,
            )
            .map_err(|e| MetricsError::Build(e.to_string()))
    }

    /// Install the recorder without an HTTP listener; use [`Self::render`] to read it.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder that is already installed (e.g., by another test) is tolerated.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        match Self::builder()?.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Install the recorder and serve `/metrics` on the configured address.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or the listener cannot be installed.
    pub fn serve(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        Self::builder()?
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if [`Self::start`] did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Baggage side
    describe_counter!(
        "baggage_events_published_total",
        "Total number of baggage state change events acknowledged by the bus"
    );
    describe_counter!(
        "baggage_publish_retries_total",
        "Total number of publish retries after a transient bus error"
    );
    describe_counter!(
        "baggage_publish_failures_total",
        "Total number of publishes that gave up"
    );
    describe_histogram!(
        "baggage_publish_duration_seconds",
        "Time taken to publish an event, retries included"
    );
    describe_counter!(
        "outbox_rows_dispatched_total",
        "Total number of outbox rows published and removed by the dispatcher"
    );

    // Passenger side
    describe_counter!(
        "passenger_notifications_created_total",
        "Total number of passenger notifications created"
    );
    describe_counter!(
        "passenger_events_duplicate_total",
        "Total number of events acknowledged as duplicates"
    );
    describe_counter!(
        "passenger_events_dead_lettered_total",
        "Total number of events routed to the dead-letter destination"
    );
    describe_counter!(
        "passenger_consume_retries_total",
        "Total number of in-place re-processing attempts after a transient failure"
    );
    describe_histogram!(
        "passenger_event_processing_duration_seconds",
        "Time taken to process one record"
    );
}

/// Change publisher metrics recorder.
pub struct PublisherMetrics;

impl PublisherMetrics {
    /// Record an acknowledged publish.
    pub fn record_published(duration: Duration) {
        counter!("baggage_events_published_total").increment(1);
        histogram!("baggage_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a retry.
    pub fn record_retry() {
        counter!("baggage_publish_retries_total").increment(1);
    }

    /// Record a publish that gave up.
    pub fn record_failure() {
        counter!("baggage_publish_failures_total").increment(1);
    }

    /// Record outbox rows removed by the dispatcher.
    pub fn record_dispatched(count: usize) {
        counter!("outbox_rows_dispatched_total").increment(u64::try_from(count).unwrap_or(u64::MAX));
    }
}

/// Change subscriber metrics recorder.
pub struct SubscriberMetrics;

impl SubscriberMetrics {
    /// Record a notification created.
    pub fn record_applied() {
        counter!("passenger_notifications_created_total").increment(1);
    }

    /// Record a duplicate delivery.
    pub fn record_duplicate() {
        counter!("passenger_events_duplicate_total").increment(1);
    }

    /// Record a dead-lettered record.
    pub fn record_dead_lettered(kind: &'static str) {
        counter!("passenger_events_dead_lettered_total", "kind" => kind).increment(1);
    }

    /// Record an in-place retry.
    pub fn record_retry() {
        counter!("passenger_consume_retries_total").increment(1);
    }

    /// Record how long one pass over a record took.
    pub fn record_processing(duration: Duration) {
        histogram!("passenger_event_processing_duration_seconds").record(duration.as_secs_f64());
    }
}
