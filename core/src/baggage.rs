//! The baggage record, as far as transition validation needs it.

use crate::status::{self, BaggageStatus, InvalidTransitionError};
use crate::types::{BaggageId, PassengerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A piece of checked-in baggage.
///
/// Owned by the baggage subsystem. Never deleted; mutated only through
/// [`Baggage::apply`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baggage {
    /// Database-assigned identity.
    pub id: BaggageId,
    /// Owner of the bag.
    pub passenger_id: PassengerId,
    /// Weight in kilograms.
    pub weight: i32,
    /// Current lifecycle status.
    pub status: BaggageStatus,
}

/// Request to register a new bag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBaggage {
    /// Owner of the bag.
    pub passenger_id: PassengerId,
    /// Weight in kilograms.
    pub weight: i32,
}

/// A registration request that cannot be accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidBaggageError {
    /// Weight must be a positive number of kilograms.
    #[error("Baggage weight must be positive, got {0}")]
    NonPositiveWeight(i32),

    /// Passenger ids are positive.
    #[error("Invalid passenger id: {0}")]
    InvalidPassenger(PassengerId),
}

impl NewBaggage {
    /// Build a registration request.
    #[must_use]
    pub const fn new(passenger_id: PassengerId, weight: i32) -> Self {
        Self {
            passenger_id,
            weight,
        }
    }

    /// Check the request before it is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidBaggageError`] for a non-positive weight or passenger id.
    pub const fn validate(&self) -> Result<(), InvalidBaggageError> {
        if self.weight <= 0 {
            return Err(InvalidBaggageError::NonPositiveWeight(self.weight));
        }
        if self.passenger_id.get() <= 0 {
            return Err(InvalidBaggageError::InvalidPassenger(self.passenger_id));
        }
        Ok(())
    }
}

/// The outcome of a validated transition, before it is committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusChange {
    /// The bag being changed.
    pub baggage_id: BaggageId,
    /// Owner of the bag.
    pub passenger_id: PassengerId,
    /// Status before the change.
    pub previous: Option<BaggageStatus>,
    /// Status after the change.
    pub new: BaggageStatus,
}

impl Baggage {
    /// Run the state machine for `requested` against the current status.
    ///
    /// Does not mutate `self`; the caller commits the returned change and
    /// then calls [`Baggage::with_status`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransitionError`] if the lifecycle forbids the move.
    pub const fn apply(&self, requested: BaggageStatus) -> Result<StatusChange, InvalidTransitionError> {
        match status::transition(self.status, requested) {
            Ok(new) => Ok(StatusChange {
                baggage_id: self.id,
                passenger_id: self.passenger_id,
                previous: Some(self.status),
                new,
            }),
            Err(e) => Err(e),
        }
    }

    /// Copy of this bag in a new status.
    #[must_use]
    pub fn with_status(&self, status: BaggageStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;

    fn bag(status: BaggageStatus) -> Baggage {
        Baggage {
            id: BaggageId::new(7),
            passenger_id: PassengerId::new(100),
            weight: 20,
            status,
        }
    }

    #[test]
    fn apply_reports_previous_and_new_status() {
        let change = bag(BaggageStatus::Registered).apply(BaggageStatus::Claimed);
        assert_eq!(
            change,
            Ok(StatusChange {
                baggage_id: BaggageId::new(7),
                passenger_id: PassengerId::new(100),
                previous: Some(BaggageStatus::Registered),
                new: BaggageStatus::Claimed,
            })
        );
    }

    #[test]
    fn apply_rejects_illegal_move_without_touching_bag() {
        let claimed = bag(BaggageStatus::Claimed);
        assert!(claimed.apply(BaggageStatus::Claimed).is_err());
        assert_eq!(claimed.status, BaggageStatus::Claimed);
    }

    #[test]
    fn validates_registration() {
        assert!(NewBaggage::new(PassengerId::new(100), 20).validate().is_ok());
        assert_eq!(
            NewBaggage::new(PassengerId::new(100), 0).validate(),
            Err(InvalidBaggageError::NonPositiveWeight(0))
        );
        assert_eq!(
            NewBaggage::new(PassengerId::new(-1), 20).validate(),
            Err(InvalidBaggageError::InvalidPassenger(PassengerId::new(-1)))
        );
    }
}
