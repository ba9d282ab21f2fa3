//! # Baggage Tracker Core
//!
//! Domain types and contracts for propagating baggage status changes from the
//! baggage subsystem to the passenger notification subsystem.
//!
//! This crate has no I/O. It provides:
//!
//! - **Status state machine**: [`status::transition`] validates lifecycle moves
//! - **Event schema**: [`event::BaggageStateChangeEvent`], the wire contract
//! - **Notification builder**: [`notification::NotificationBuilder`]
//! - **Contracts**: [`event_bus::EventBus`] and the storage traits in [`store`]
//!
//! ## Architecture Principles
//!
//! - Pure validation in the core, side effects in the runtime
//! - At-least-once delivery with idempotent effects
//! - Per-baggage ordering through the partition key
//! - Collaborators injected as trait objects so tests can use in-memory fakes
//!
//! ## Example
//!
//! ```
//! use baggage_tracker_core::status::{transition, BaggageStatus};
//!
//! assert_eq!(
//!     transition(BaggageStatus::Registered, BaggageStatus::CheckedIn),
//!     Ok(BaggageStatus::CheckedIn)
//! );
//! assert!(transition(BaggageStatus::Claimed, BaggageStatus::Claimed).is_err());
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Baggage record and status change values
pub mod baggage;

/// Dead-letter record
pub mod dead_letter;

/// The baggage state change wire contract
pub mod event;

/// Event bus abstraction
pub mod event_bus;

/// Passenger notifications and their message templates
pub mod notification;

/// Status lifecycle and transition rules
pub mod status;

/// Storage contracts
pub mod store;

/// Identifier newtypes
pub mod types;

/// Environment module - Dependency injection traits
///
/// External dependencies that make code non-deterministic are abstracted
/// behind traits so tests can substitute fixed implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use baggage::{Baggage, NewBaggage, StatusChange};
pub use dead_letter::DeadLetter;
pub use event::{BaggageStateChangeEvent, MalformedEventError};
pub use notification::{Notification, NotificationBuilder};
pub use status::{BaggageStatus, InvalidTransitionError};
pub use types::{BaggageId, EventId, NotificationId, PassengerId};
