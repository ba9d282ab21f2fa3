//! Logging and metrics setup shared by the binaries.

use crate::config::{Config, ConfigError};
use baggage_tracker_runtime::metrics::{MetricsError, MetricsServer};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "baggage_tracker=info";

/// Failures while setting up observability.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// `METRICS_ADDR` is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The Prometheus exporter could not start.
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`; otherwise logs this workspace at `info`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Serve `/metrics` on the configured address.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the address is invalid or the exporter
/// cannot bind.
pub fn start_metrics(config: &Config) -> Result<MetricsServer, TelemetryError> {
    let mut server = MetricsServer::new(config.metrics_socket_addr()?);
    server.serve()?;
    Ok(server)
}
