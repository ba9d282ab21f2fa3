//! The `BaggageStateChange` wire contract.
//!
//! Producer and consumer agree on this schema, not on shared code paths. The
//! checked-in JSON Schema at `schema/baggage-state-change.v1.json` is the
//! authoritative definition; the types here are pinned to it by tests so the
//! two sides cannot silently drift on the set of valid statuses.
//!
//! ```json
//! {"eventId":"b1b6...","baggageId":100,"passengerId":1,
//!  "previousStatus":"CHECKED_IN","newStatus":"CLAIMED",
//!  "occurredAt":"2024-01-01T10:00:00Z"}
//! ```
//!
//! Events are encoded as JSON rather than a binary format so that operators can
//! read dead-lettered records and non-Rust consumers can join the topic.

use crate::baggage::StatusChange;
use crate::status::{BaggageStatus, InvalidTransitionError};
use crate::types::{BaggageId, EventId, PassengerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the wire schema implemented by this crate.
pub const SCHEMA_VERSION: u32 = 1;

/// The checked-in JSON Schema for [`BaggageStateChangeEvent`].
pub const JSON_SCHEMA: &str = include_str!("../schema/baggage-state-change.v1.json");

/// Immutable fact: one baggage status change.
///
/// Created once when the change is committed; never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaggageStateChangeEvent {
    /// Unique id, the consumer-side idempotency key.
    pub event_id: EventId,
    /// The bag whose status changed. Also the partition key.
    pub baggage_id: BaggageId,
    /// Owner of the bag.
    pub passenger_id: PassengerId,
    /// Status before the change, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<BaggageStatus>,
    /// Status after the change.
    pub new_status: BaggageStatus,
    /// When the change was committed.
    pub occurred_at: DateTime<Utc>,
}

/// Reasons an incoming record is rejected by schema validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedEventError {
    /// Payload is not a JSON object.
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    /// A required field is absent or null.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field is present but has the wrong type or format.
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField {
        /// The offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A status field holds a value outside the lifecycle.
    #[error("Unrecognized status value in field '{field}': {value}")]
    UnknownStatus {
        /// `previousStatus` or `newStatus`.
        field: &'static str,
        /// The raw value.
        value: String,
    },

    /// `previousStatus → newStatus` is not an allowed transition.
    #[error("Event describes an illegal transition: {0}")]
    IllegalTransition(InvalidTransitionError),
}

impl BaggageStateChangeEvent {
    /// Create the event for a committed status change.
    #[must_use]
    pub const fn from_change(
        event_id: EventId,
        change: &StatusChange,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            baggage_id: change.baggage_id,
            passenger_id: change.passenger_id,
            previous_status: change.previous,
            new_status: change.new,
            occurred_at,
        }
    }

    /// Partition key on the bus: the decimal baggage id.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.baggage_id.to_string()
    }

    /// Encode as the JSON wire payload.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if encoding fails, which does not happen
    /// for well-formed values.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode and validate a wire payload.
    ///
    /// Validation is stricter than plain deserialization so that the reason a
    /// record was rejected is specific enough for an operator to act on.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedEventError`] when the payload is not JSON, lacks a
    /// required field, carries an unknown status, has a non-positive id, or
    /// describes a transition the lifecycle forbids.
    pub fn decode(payload: &[u8]) -> Result<Self, MalformedEventError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| MalformedEventError::InvalidJson(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| MalformedEventError::InvalidJson("expected a JSON object".into()))?;

        let event_id = required_str(object, "eventId")?
            .parse::<uuid::Uuid>()
            .map(EventId::from_uuid)
            .map_err(|e| MalformedEventError::InvalidField {
                field: "eventId",
                reason: e.to_string(),
            })?;
        let baggage_id = BaggageId::new(required_positive_id(object, "baggageId")?);
        let passenger_id = PassengerId::new(required_positive_id(object, "passengerId")?);
        let new_status = status_field(object, "newStatus")?
            .ok_or(MalformedEventError::MissingField("newStatus"))?;
        let previous_status = status_field(object, "previousStatus")?;
        let occurred_at = DateTime::parse_from_rfc3339(required_str(object, "occurredAt")?)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| MalformedEventError::InvalidField {
                field: "occurredAt",
                reason: e.to_string(),
            })?;

        if let Some(previous) = previous_status {
            crate::status::transition(previous, new_status)
                .map_err(MalformedEventError::IllegalTransition)?;
        }

        Ok(Self {
            event_id,
            baggage_id,
            passenger_id,
            previous_status,
            new_status,
            occurred_at,
        })
    }
}

type JsonObject = serde_json::Map<String, serde_json::Value>;

fn present<'a>(
    object: &'a JsonObject,
    field: &'static str,
) -> Option<&'a serde_json::Value> {
    object.get(field).filter(|value| !value.is_null())
}

fn required_str<'a>(
    object: &'a JsonObject,
    field: &'static str,
) -> Result<&'a str, MalformedEventError> {
    present(object, field)
        .ok_or(MalformedEventError::MissingField(field))?
        .as_str()
        .ok_or_else(|| MalformedEventError::InvalidField {
            field,
            reason: "expected a string".into(),
        })
}

fn required_positive_id(object: &JsonObject, field: &'static str) -> Result<i64, MalformedEventError> {
    let id = present(object, field)
        .ok_or(MalformedEventError::MissingField(field))?
        .as_i64()
        .ok_or_else(|| MalformedEventError::InvalidField {
            field,
            reason: "expected an integer".into(),
        })?;
    if id <= 0 {
        return Err(MalformedEventError::InvalidField {
            field,
            reason: format!("expected a positive id, got {id}"),
        });
    }
    Ok(id)
}

fn status_field(
    object: &JsonObject,
    field: &'static str,
) -> Result<Option<BaggageStatus>, MalformedEventError> {
    let Some(value) = present(object, field) else {
        return Ok(None);
    };
    let raw = value.as_str().ok_or_else(|| MalformedEventError::InvalidField {
        field,
        reason: "expected a string".into(),
    })?;
    raw.parse()
        .map(Some)
        .map_err(|_| MalformedEventError::UnknownStatus {
            field,
            value: raw.to_string(),
        })
}
