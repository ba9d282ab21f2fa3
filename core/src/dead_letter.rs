//! Dead-letter record for events the subscriber gave up on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record routed to the dead-letter destination.
///
/// Serialized as `{originalEvent, reason, firstSeenAt, attempts}` plus the
/// position the record was read from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// The original payload: parsed JSON when possible, else the raw text.
    pub original_event: serde_json::Value,
    /// Why processing was abandoned.
    pub reason: String,
    /// When the record was first seen by the subscriber.
    pub first_seen_at: DateTime<Utc>,
    /// Processing attempts made.
    pub attempts: u32,
    /// Topic the record came from.
    pub source_topic: String,
    /// Partition the record came from.
    pub source_partition: i32,
    /// Offset the record came from.
    pub source_offset: i64,
    /// Partition key of the original record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl DeadLetter {
    /// Interpret a raw payload for the `originalEvent` field.
    #[must_use]
    pub fn original_from_payload(payload: &[u8]) -> serde_json::Value {
        serde_json::from_slice(payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(payload).into_owned())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;

    #[test]
    fn keeps_json_payloads_structured() {
        let value = DeadLetter::original_from_payload(br#"{"baggageId":1}"#);
        assert_eq!(value["baggageId"], 1);
    }

    #[test]
    fn falls_back_to_raw_text() {
        let value = DeadLetter::original_from_payload(b"{oops");
        assert_eq!(value, serde_json::Value::String("{oops".into()));
    }

    #[test]
    fn serializes_documented_field_names() {
        let letter = DeadLetter {
            original_event: serde_json::json!({"baggageId": 1}),
            reason: "Missing required field: newStatus".into(),
            first_seen_at: Utc::now(),
            attempts: 1,
            source_topic: "baggage-state-change".into(),
            source_partition: 0,
            source_offset: 3,
            key: None,
        };
        let value = serde_json::to_value(&letter).unwrap_or_default();
        for field in ["originalEvent", "reason", "firstSeenAt", "attempts"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
    }
}
