//! # Baggage Tracker
//!
//! Runs the two halves of baggage status propagation:
//!
//! - **`baggage-service`**: drains the outbox onto the
//!   `baggage-state-change` topic (`BAGGAGE_RECONCILE_ONCE=true` runs a single
//!   reconciliation sweep and exits)
//! - **`passenger-service`**: consumes the topic with a worker pool and turns
//!   each status change into exactly one passenger notification
//!
//! The binaries need the `redpanda` feature. The library part ([`config`],
//! [`bootstrap`]) builds without it.
//!
//! ## Example
//!
//! ```
//! use baggage_tracker::bootstrap::BaggageNode;
//! use baggage_tracker::config::Config;
//! use baggage_tracker_core::environment::SystemClock;
//! use baggage_tracker_testing::{InMemoryBaggageRepository, InMemoryEventBus};
//! use std::sync::Arc;
//!
//! let config = Config::from_lookup(|_| None).unwrap();
//! config.validate().unwrap();
//!
//! let repo = InMemoryBaggageRepository::new();
//! let _node = BaggageNode::assemble(
//!     &config,
//!     Arc::new(repo.clone()),
//!     Arc::new(repo),
//!     Arc::new(InMemoryEventBus::new()),
//!     Arc::new(SystemClock),
//! );
//! ```

pub mod bootstrap;
pub mod config;
pub mod shutdown;
pub mod telemetry;

pub use bootstrap::{BaggageNode, connect_database, dead_letter_sink, passenger_pool};
pub use config::{Config, ConfigError, DeadLetterStore};
