//! Passenger notifications derived from baggage status changes.

use crate::event::BaggageStateChangeEvent;
use crate::status::BaggageStatus;
use crate::types::{BaggageId, EventId, NotificationId, PassengerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A notification shown to a passenger.
///
/// At most one exists per `source_event_id`; storage enforces this with a
/// uniqueness constraint. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Identity of the notification.
    pub notification_id: NotificationId,
    /// Recipient.
    pub passenger_id: PassengerId,
    /// The bag the notification is about.
    pub baggage_id: BaggageId,
    /// Human-readable text.
    pub message: String,
    /// When the notification was created.
    pub created_at: DateTime<Utc>,
    /// The event that produced this notification.
    pub source_event_id: EventId,
}

/// Maps status change events to notifications.
///
/// Stateless; id and timestamp are supplied by the caller so that `build`
/// stays a pure function.
#[derive(Clone, Copy, Debug, Default)]
pub struct NotificationBuilder;

impl NotificationBuilder {
    /// Create a builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Message text for a change into `new_status`.
    #[must_use]
    pub fn message(previous_status: Option<BaggageStatus>, new_status: BaggageStatus) -> String {
        let base = match new_status {
            BaggageStatus::Registered => "Your baggage has been registered.",
            BaggageStatus::CheckedIn => "Your baggage has been checked in.",
            BaggageStatus::Loaded => "Your baggage has been loaded onto the aircraft.",
            BaggageStatus::InTransit => "Your baggage is in transit.",
            BaggageStatus::Arrived => {
                "Your baggage has arrived and will be available at the baggage claim shortly."
            }
            BaggageStatus::Claimed => "Your baggage has been claimed.",
            BaggageStatus::Lost => {
                "Your baggage has been reported lost; our team will contact you."
            }
        };
        match (new_status, previous_status) {
            (BaggageStatus::Lost, Some(previous)) => {
                format!("{base} Last known status: {}.", previous.describe())
            }
            _ => base.to_string(),
        }
    }

    /// Build the notification for `event`.
    #[must_use]
    pub fn build(
        &self,
        event: &BaggageStateChangeEvent,
        notification_id: NotificationId,
        created_at: DateTime<Utc>,
    ) -> Notification {
        Notification {
            notification_id,
            passenger_id: event.passenger_id,
            baggage_id: event.baggage_id,
            message: Self::message(event.previous_status, event.new_status),
            created_at,
            source_event_id: event.event_id,
        }
    }
}
