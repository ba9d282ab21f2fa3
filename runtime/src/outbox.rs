//! Outbox dispatcher.
//!
//! Status changes record their event in the outbox inside the same
//! transaction. The dispatcher sweeps pending rows oldest first, publishes
//! them, and removes each row only once the bus acknowledged it. A row that
//! fails stays put and is tried again on the next sweep, forever.
//!
//! A single sweep is also the reconciliation step operators run after a
//! publish failure was reported.

use crate::metrics::PublisherMetrics;
use crate::publisher::ChangePublisher;
use baggage_tracker_core::store::{Outbox, StoreError};
use baggage_tracker_core::types::BaggageId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Outcome of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Rows published and removed
    pub dispatched: usize,
    /// Rows whose publish failed
    pub failed: usize,
    /// Rows held back behind an earlier failure for the same bag
    pub skipped: usize,
}

impl DispatchReport {
    /// Whether nothing was left behind.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Publishes pending outbox rows until the bus accepts them.
pub struct OutboxDispatcher {
    outbox: Arc<dyn Outbox>,
    publisher: Arc<ChangePublisher>,
    batch_size: usize,
    poll_interval: Duration,
}

impl OutboxDispatcher {
    /// Dispatcher with a batch size of 100 and a 500ms poll interval.
    #[must_use]
    pub fn new(outbox: Arc<dyn Outbox>, publisher: Arc<ChangePublisher>) -> Self {
        Self {
            outbox,
            publisher,
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Set how many rows one sweep reads.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the pause between sweeps.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Publish one batch of pending rows.
    ///
    /// Once a row for a bag fails, that bag's later rows are skipped until the
    /// next sweep so they cannot overtake it on the bus.
    ///
    /// # Errors
    ///
    /// Returns the store error if the outbox cannot be read or updated.
    pub async fn dispatch_pending(&self) -> Result<DispatchReport, StoreError> {
        let entries = self.outbox.pending(self.batch_size).await?;
        let mut report = DispatchReport::default();
        let mut blocked: HashSet<BaggageId> = HashSet::new();

        for entry in entries {
            let event = &entry.event;
            if blocked.contains(&event.baggage_id) {
                report.skipped += 1;
                continue;
            }

            match self.publisher.publish(event).await {
                Ok(_) => {
                    self.outbox.remove(&event.event_id).await?;
                    report.dispatched += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        baggage_id = %event.baggage_id,
                        previous_attempts = entry.attempts,
                        error = %e,
                        "Outbox row not published, will retry"
                    );
                    self.outbox.record_failure(&event.event_id, &e.to_string()).await?;
                    blocked.insert(event.baggage_id);
                    report.failed += 1;
                }
            }
        }

        if report.dispatched > 0 {
            PublisherMetrics::record_dispatched(report.dispatched);
        }
        Ok(report)
    }

    /// Sweep until `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis(),
            "Outbox dispatcher started"
        );

        loop {
            match self.dispatch_pending().await {
                Ok(report) if report.dispatched > 0 || report.failed > 0 => {
                    tracing::info!(
                        dispatched = report.dispatched,
                        failed = report.failed,
                        skipped = report.skipped,
                        "Outbox sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Outbox sweep failed"),
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("Outbox dispatcher stopped");
    }
}
