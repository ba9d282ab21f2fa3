//! # Baggage Tracker Testing
//!
//! Test doubles for the baggage tracker.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: partitioned log with consumer-group offsets
//! - In-memory stores with failure injection ([`stores`])
//! - Deterministic clocks ([`mocks`])
//!
//! ## Example
//!
//! ```
//! use baggage_tracker_core::store::BaggageRepository;
//! use baggage_tracker_core::{NewBaggage, PassengerId, BaggageStatus};
//! use baggage_tracker_testing::InMemoryBaggageRepository;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = InMemoryBaggageRepository::new();
//! let bag = repo.insert(NewBaggage::new(PassengerId::new(100), 23)).await?;
//! assert_eq!(bag.status, BaggageStatus::Registered);
//! # Ok(())
//! # }
//! ```

use baggage_tracker_core::environment::Clock;
use chrono::{DateTime, Utc};

/// In-memory event bus
pub mod event_bus;

/// In-memory stores
pub mod stores;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use baggage_tracker_testing::mocks::FixedClock;
    /// use baggage_tracker_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that advances by one second on every read.
    ///
    /// Useful when ordering by timestamp must be observable.
    #[derive(Debug)]
    pub struct SteppingClock {
        next: Mutex<DateTime<Utc>>,
    }

    impl SteppingClock {
        /// Start at `start`.
        #[must_use]
        pub const fn new(start: DateTime<Utc>) -> Self {
            Self {
                next: Mutex::new(start),
            }
        }
    }

    impl Clock for SteppingClock {
        #[allow(clippy::unwrap_used)] // Poisoned lock means a test already failed
        fn now(&self) -> DateTime<Utc> {
            let mut next = self.next.lock().unwrap();
            let now = *next;
            *next = now + chrono::Duration::seconds(1);
            now
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test subscriber that writes to the test harness output.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("baggage_tracker=debug")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use event_bus::{InMemoryEventBus, StoredRecord};
pub use mocks::{FixedClock, SteppingClock, test_clock};
pub use stores::{InMemoryBaggageRepository, InMemoryDeadLetterSink, InMemoryNotificationStore};
