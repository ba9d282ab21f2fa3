//! Baggage status lifecycle and the transition rules that guard it.
//!
//! The lifecycle is ordered but not strictly linear:
//!
//! ```text
//! REGISTERED → CHECKED_IN → LOADED → IN_TRANSIT → ARRIVED → CLAIMED
//!      │            │          │          │           │
//!      └────────────┴──────────┴──────────┴───────────┴──────→ LOST
//! ```
//!
//! A bag may move to any *later* stage (missed scans skip stages), may be
//! reported `LOST` from any non-terminal stage, and never moves backwards.
//! `CLAIMED` and `LOST` are terminal.
//!
//! [`transition`] is pure so it can be checked over the full status × status
//! matrix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Status of a piece of baggage.
///
/// Serialized with the SCREAMING_SNAKE_CASE names used on the wire
/// (`"CHECKED_IN"`, `"IN_TRANSIT"`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BaggageStatus {
    /// Baggage is known to the system but not yet handed over.
    Registered,
    /// Handed over at the check-in desk.
    CheckedIn,
    /// Loaded onto the aircraft.
    Loaded,
    /// Aircraft has departed.
    InTransit,
    /// Unloaded at the destination.
    Arrived,
    /// Picked up by the passenger. Terminal.
    Claimed,
    /// Reported lost. Terminal.
    Lost,
}

impl BaggageStatus {
    /// Every status, in lifecycle order with `Lost` last.
    pub const ALL: [Self; 7] = [
        Self::Registered,
        Self::CheckedIn,
        Self::Loaded,
        Self::InTransit,
        Self::Arrived,
        Self::Claimed,
        Self::Lost,
    ];

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::CheckedIn => "CHECKED_IN",
            Self::Loaded => "LOADED",
            Self::InTransit => "IN_TRANSIT",
            Self::Arrived => "ARRIVED",
            Self::Claimed => "CLAIMED",
            Self::Lost => "LOST",
        }
    }

    /// Lower-case words for use in human-readable text.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::CheckedIn => "checked in",
            Self::Loaded => "loaded",
            Self::InTransit => "in transit",
            Self::Arrived => "arrived",
            Self::Claimed => "claimed",
            Self::Lost => "lost",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Claimed | Self::Lost)
    }

    /// Position on the main lifecycle path. `Lost` sits off the path.
    const fn rank(self) -> Option<u8> {
        match self {
            Self::Registered => Some(0),
            Self::CheckedIn => Some(1),
            Self::Loaded => Some(2),
            Self::InTransit => Some(3),
            Self::Arrived => Some(4),
            Self::Claimed => Some(5),
            Self::Lost => None,
        }
    }

    /// Whether `self → next` is an allowed transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    /// The statuses reachable from `self` in one transition.
    #[must_use]
    pub fn allowed_transitions(self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|next| self.can_transition_to(*next))
            .collect()
    }
}

impl fmt::Display for BaggageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status name that is not part of the lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown baggage status: {0}")]
pub struct UnknownStatusError(pub String);

impl FromStr for BaggageStatus {
    type Err = UnknownStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatusError(s.to_string()))
    }
}

/// A requested status change that the lifecycle does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid baggage status transition: {current} -> {requested}")]
pub struct InvalidTransitionError {
    /// Status the baggage is currently in.
    pub current: BaggageStatus,
    /// Status that was requested.
    pub requested: BaggageStatus,
}

/// Validate and apply a status transition.
///
/// # Errors
///
/// Returns [`InvalidTransitionError`] naming both statuses when `requested` is
/// not reachable from `current`. This includes repeating a transition that was
/// already applied (claiming a claimed bag), so a retried command can never
/// produce a second downstream event.
pub const fn transition(
    current: BaggageStatus,
    requested: BaggageStatus,
) -> Result<BaggageStatus, InvalidTransitionError> {
    if current.can_transition_to(requested) {
        Ok(requested)
    } else {
        Err(InvalidTransitionError { current, requested })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use BaggageStatus::{Arrived, CheckedIn, Claimed, InTransit, Loaded, Lost, Registered};
    use proptest::prelude::*;

    fn expected_allowed(from: BaggageStatus) -> &'static [BaggageStatus] {
        match from {
            Registered => &[CheckedIn, Loaded, InTransit, Arrived, Claimed, Lost],
            CheckedIn => &[Loaded, InTransit, Arrived, Claimed, Lost],
            Loaded => &[InTransit, Arrived, Claimed, Lost],
            InTransit => &[Arrived, Claimed, Lost],
            Arrived => &[Claimed, Lost],
            Claimed | Lost => &[],
        }
    }

    #[test]
    fn transition_matrix_matches_lifecycle() {
        for from in BaggageStatus::ALL {
            for to in BaggageStatus::ALL {
                let allowed = expected_allowed(from).contains(&to);
                match transition(from, to) {
                    Ok(next) => {
                        assert!(allowed, "{from} -> {to} should be rejected");
                        assert_eq!(next, to);
                    }
                    Err(err) => {
                        assert!(!allowed, "{from} -> {to} should be allowed");
                        assert_eq!(err.current, from);
                        assert_eq!(err.requested, to);
                    }
                }
            }
        }
    }

    #[test]
    fn allowed_transitions_lists_reachable_statuses() {
        for from in BaggageStatus::ALL {
            assert_eq!(from.allowed_transitions(), expected_allowed(from));
        }
    }

    #[test]
    fn terminal_statuses_reject_repeat() {
        assert!(transition(Registered, Claimed).is_ok());
        assert_eq!(
            transition(Claimed, Claimed),
            Err(InvalidTransitionError { current: Claimed, requested: Claimed })
        );
        assert!(transition(CheckedIn, Lost).is_ok());
        assert!(transition(Lost, Lost).is_err());
    }

    #[test]
    fn error_names_both_statuses() {
        let err = transition(Arrived, CheckedIn).unwrap_err();
        assert_eq!(err.to_string(), "Invalid baggage status transition: ARRIVED -> CHECKED_IN");
    }

    #[test]
    fn wire_names_round_trip() {
        for status in BaggageStatus::ALL {
            assert_eq!(status.as_str().parse::<BaggageStatus>(), Ok(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(
            "checked_in".parse::<BaggageStatus>(),
            Err(UnknownStatusError("checked_in".to_string()))
        );
    }

    fn any_status() -> impl Strategy<Value = BaggageStatus> {
        prop::sample::select(BaggageStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn no_transition_goes_backwards(from in any_status(), to in any_status()) {
            if let (Some(a), Some(b)) = (from.rank(), to.rank()) {
                if b <= a {
                    prop_assert!(transition(from, to).is_err());
                }
            }
        }

        #[test]
        fn applying_the_same_transition_twice_fails(from in any_status(), to in any_status()) {
            if let Ok(next) = transition(from, to) {
                prop_assert!(transition(next, to).is_err());
            }
        }
    }
}
