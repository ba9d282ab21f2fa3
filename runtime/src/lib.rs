//! # Baggage Tracker Runtime
//!
//! The moving parts between the two subsystems.
//!
//! ## Core Components
//!
//! - **Baggage side**: [`baggage::BaggageService`] commits status changes with
//!   an outbox row, [`publisher::ChangePublisher`] puts them on the bus and
//!   [`outbox::OutboxDispatcher`] retries whatever did not make it
//! - **Passenger side**: [`subscriber::SubscriberPool`] feeds records to
//!   [`subscriber::ChangeSubscriber`], which deduplicates and hands
//!   notifications to [`passenger::PassengerService`]
//! - **Shared**: [`retry::RetryPolicy`], [`metrics`]
//!
//! ## Example
//!
//! ```
//! use baggage_tracker_core::environment::SystemClock;
//! use baggage_tracker_core::{NewBaggage, PassengerId, BaggageStatus};
//! use baggage_tracker_runtime::baggage::BaggageService;
//! use baggage_tracker_runtime::publisher::ChangePublisher;
//! use baggage_tracker_testing::{InMemoryBaggageRepository, InMemoryEventBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = InMemoryBaggageRepository::new();
//! let bus = InMemoryEventBus::new();
//! let service = BaggageService::new(
//!     Arc::new(repo.clone()),
//!     Arc::new(repo),
//!     Arc::new(ChangePublisher::new(Arc::new(bus.clone()), "baggage-state-change")),
//!     Arc::new(SystemClock),
//! );
//!
//! let bag = service.create_baggage(NewBaggage::new(PassengerId::new(100), 20)).await?;
//! let bag = service.claim_baggage(bag.id).await?;
//! assert_eq!(bag.status, BaggageStatus::Claimed);
//! assert_eq!(bus.published("baggage-state-change").len(), 1);
//! # Ok(())
//! # }
//! ```

/// Producer-side baggage operations
pub mod baggage;

/// Bus-backed dead-letter destination
pub mod dead_letter;

/// Prometheus metrics for observability
pub mod metrics;

/// Outbox dispatcher and reconciliation sweep
pub mod outbox;

/// Consumer-side passenger notifications
pub mod passenger;

/// Change publisher
pub mod publisher;

/// Retry logic with exponential backoff
pub mod retry;

/// Change subscriber and its worker pool
pub mod subscriber;

pub use baggage::{BaggageService, BaggageServiceError};
pub use dead_letter::BusDeadLetterSink;
pub use outbox::{DispatchReport, OutboxDispatcher};
pub use passenger::{PassengerService, PassengerServiceError};
pub use publisher::{ChangePublisher, PublishError, Published};
pub use retry::RetryPolicy;
pub use subscriber::{ChangeSubscriber, ConsumeError, ProcessingOutcome, SubscriberPool};
