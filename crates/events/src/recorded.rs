use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use reserva_core::StreamType;

use crate::event::Event;

/// A stored event in an append-only stream.
///
/// This is the unit of persistence and transport: the JSON form of this struct
/// is the blob-store object body and the queue message body. Field names are
/// part of the stored data format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    pub event_id: Uuid,
    pub stream_id: Uuid,
    pub stream_type: StreamType,

    /// Monotonically increasing position in the stream, starting at 1.
    pub version: u64,

    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: JsonValue,

    pub occurred_at_utc: DateTime<Utc>,

    /// Opaque command metadata (command name, actor).
    pub meta: JsonValue,
}

impl RecordedEvent {
    /// Build a recorded event from a typed domain event.
    ///
    /// Assigns a fresh UUIDv7 event id; the caller supplies the version slot
    /// it is about to claim with a conditional append.
    pub fn from_typed<E>(
        stream_type: StreamType,
        stream_id: Uuid,
        version: u64,
        event: &E,
        meta: JsonValue,
    ) -> serde_json::Result<Self>
    where
        E: Event,
    {
        Ok(Self {
            event_id: Uuid::now_v7(),
            stream_id,
            stream_type,
            version,
            event_type: event.event_type().to_string(),
            payload: event.payload()?,
            occurred_at_utc: event.occurred_at(),
            meta,
        })
    }

    /// Decode the payload back into a typed domain event.
    ///
    /// `None` means the type tag is not part of `E`'s union; folds skip it.
    pub fn to_typed<E>(&self) -> Option<E>
    where
        E: Event,
    {
        E::decode(&self.event_type, &self.payload)
    }
}

/// A materialized aggregate state at a specific stream version.
///
/// Snapshots are accelerators: correctness never depends on them, and
/// `snapshot_version == last_event_version` always holds. Folding the tail
/// from `last_event_version + 1` onto `state` reproduces the same state as
/// folding the stream from version 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    pub stream_type: StreamType,
    pub stream_id: Uuid,
    pub snapshot_version: u64,
    pub last_event_version: u64,
    pub state: JsonValue,
    pub created_at_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_event_uses_the_stored_field_names() {
        let event = RecordedEvent {
            event_id: Uuid::now_v7(),
            stream_id: Uuid::now_v7(),
            stream_type: StreamType::Resource,
            version: 3,
            event_type: "ResourceCreated".to_string(),
            payload: serde_json::json!({"name": "SalaA"}),
            occurred_at_utc: Utc::now(),
            meta: serde_json::json!({}),
        };

        let value = serde_json::to_value(&event).unwrap();
        let obj = value.as_object().unwrap();
        for field in [
            "eventId",
            "streamId",
            "streamType",
            "version",
            "type",
            "payload",
            "occurredAtUtc",
            "meta",
        ] {
            assert!(obj.contains_key(field), "missing field {field}");
        }
        assert_eq!(value["streamType"], "resource");
        assert_eq!(value["type"], "ResourceCreated");

        let back: RecordedEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn snapshot_roundtrips_with_camel_case_fields() {
        let snapshot = StreamSnapshot {
            stream_type: StreamType::User,
            stream_id: Uuid::now_v7(),
            snapshot_version: 500,
            last_event_version: 500,
            state: serde_json::json!({"email": "admin@test.com"}),
            created_at_utc: Utc::now(),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.get("snapshotVersion").is_some());
        assert!(value.get("lastEventVersion").is_some());

        let back: StreamSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }
}
