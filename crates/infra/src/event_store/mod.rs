//! Append-only per-stream event log over a blob store, with snapshots.
//!
//! Layout (the key encodes the version, so writers racing for the same slot
//! produce exactly one winner):
//!
//! ```text
//! {streamType}/{streamId}/{version:012}.json
//! snapshots/{streamType}/{streamId}/{snapshotVersion:012}.json
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use reserva_core::StreamType;
use reserva_events::{RecordedEvent, StreamSnapshot};

use crate::blob::{BlobMetadata, BlobStore, BlobStoreError};

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Another writer claimed this version slot first.
    #[error("version conflict on {stream_type}/{stream_id} at version {version}")]
    VersionConflict {
        stream_type: StreamType,
        stream_id: Uuid,
        version: u64,
    },

    /// A stable hole in the stream listing: a read-consistency defect, never
    /// silently skipped.
    #[error("stream gap detected: expected version {expected}, actual {actual}")]
    StreamGapDetected { expected: u64, actual: u64 },

    /// The caller violated an append precondition.
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// A stored object failed to decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// Underlying storage failure, surfaced unchanged.
    #[error(transparent)]
    Storage(#[from] BlobStoreError),
}

fn stream_prefix(stream_type: StreamType, stream_id: Uuid) -> String {
    format!("{}/{}/", stream_type.as_str(), stream_id)
}

fn snapshot_prefix(stream_type: StreamType, stream_id: Uuid) -> String {
    format!("snapshots/{}/{}/", stream_type.as_str(), stream_id)
}

pub(crate) fn event_key(stream_type: StreamType, stream_id: Uuid, version: u64) -> String {
    format!(
        "{}{version:012}.json",
        stream_prefix(stream_type, stream_id)
    )
}

fn snapshot_key(stream_type: StreamType, stream_id: Uuid, version: u64) -> String {
    format!(
        "{}{version:012}.json",
        snapshot_prefix(stream_type, stream_id)
    )
}

/// Parse the final path segment (`000000000042.json`) as a version number.
fn parse_version(key: &str) -> Option<u64> {
    let segment = key.rsplit('/').next()?;
    let digits = segment.strip_suffix(".json")?;
    digits.parse().ok()
}

/// Event + snapshot store over a [`BlobStore`].
#[derive(Clone)]
pub struct EventStore {
    blob: Arc<dyn BlobStore>,
}

impl EventStore {
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self { blob }
    }

    /// Load a stream's events starting at `from_inclusive` (1-based).
    ///
    /// Events come back sorted by version and contiguous. Eventually-
    /// consistent listings may briefly omit a just-written object, so a gap
    /// triggers one full reload; a gap that survives the retry is surfaced as
    /// [`EventStoreError::StreamGapDetected`].
    pub async fn load_stream(
        &self,
        stream_type: StreamType,
        stream_id: Uuid,
        from_inclusive: u64,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        match self
            .load_stream_once(stream_type, stream_id, from_inclusive)
            .await
        {
            Err(EventStoreError::StreamGapDetected { expected, actual }) => {
                debug!(
                    stream_type = %stream_type,
                    stream_id = %stream_id,
                    expected,
                    actual,
                    "gap in stream listing; retrying load once"
                );
                self.load_stream_once(stream_type, stream_id, from_inclusive)
                    .await
            }
            result => result,
        }
    }

    async fn load_stream_once(
        &self,
        stream_type: StreamType,
        stream_id: Uuid,
        from_inclusive: u64,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let prefix = stream_prefix(stream_type, stream_id);
        let keys = self.blob.list_keys(&prefix).await?;

        let mut versioned: Vec<(u64, String)> = keys
            .into_iter()
            .filter_map(|key| parse_version(&key).map(|v| (v, key)))
            .filter(|(v, _)| *v >= from_inclusive)
            .collect();
        versioned.sort_by_key(|(v, _)| *v);

        let mut events = Vec::with_capacity(versioned.len());
        let mut expected = from_inclusive;

        for (version, key) in versioned {
            if version != expected {
                return Err(EventStoreError::StreamGapDetected {
                    expected,
                    actual: version,
                });
            }

            let body = self.blob.get(&key).await?;
            let event: RecordedEvent = serde_json::from_slice(&body)
                .map_err(|e| EventStoreError::Codec(format!("{key}: {e}")))?;
            if event.version != version {
                return Err(EventStoreError::Codec(format!(
                    "{key}: body version {} does not match key version {version}",
                    event.version
                )));
            }

            events.push(event);
            expected += 1;
        }

        Ok(events)
    }

    /// Load the snapshot with the maximum version, if any exists.
    pub async fn load_latest_snapshot(
        &self,
        stream_type: StreamType,
        stream_id: Uuid,
    ) -> Result<Option<StreamSnapshot>, EventStoreError> {
        let prefix = snapshot_prefix(stream_type, stream_id);
        let keys = self.blob.list_keys(&prefix).await?;

        let Some((_, key)) = keys
            .into_iter()
            .filter_map(|key| parse_version(&key).map(|v| (v, key)))
            .max_by_key(|(v, _)| *v)
        else {
            return Ok(None);
        };

        let body = self.blob.get(&key).await?;
        let snapshot: StreamSnapshot = serde_json::from_slice(&body)
            .map_err(|e| EventStoreError::Codec(format!("{key}: {e}")))?;

        Ok(Some(snapshot))
    }

    /// Append one event at `expected_version + 1`.
    ///
    /// Atomic and observable only on success: the conditional put either
    /// creates the version-keyed object or fails with `VersionConflict`.
    pub async fn append_event(
        &self,
        event: &RecordedEvent,
        expected_version: u64,
    ) -> Result<(), EventStoreError> {
        if expected_version + 1 != event.version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event version {} does not follow expected version {expected_version}",
                event.version
            )));
        }

        let key = event_key(event.stream_type, event.stream_id, event.version);
        let body = serde_json::to_vec(event).map_err(|e| EventStoreError::Codec(e.to_string()))?;

        match self.blob.put_if_absent(&key, body, BlobMetadata::new()).await {
            Ok(()) => Ok(()),
            Err(BlobStoreError::PreconditionFailed { .. }) => {
                Err(EventStoreError::VersionConflict {
                    stream_type: event.stream_type,
                    stream_id: event.stream_id,
                    version: event.version,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store a snapshot. Best-effort: an already-existing snapshot at the same
    /// version means another writer got there first and is not an error.
    pub async fn put_snapshot(&self, snapshot: &StreamSnapshot) -> Result<(), EventStoreError> {
        if snapshot.snapshot_version != snapshot.last_event_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "snapshot version {} does not equal last event version {}",
                snapshot.snapshot_version, snapshot.last_event_version
            )));
        }

        let key = snapshot_key(
            snapshot.stream_type,
            snapshot.stream_id,
            snapshot.snapshot_version,
        );
        let body =
            serde_json::to_vec(snapshot).map_err(|e| EventStoreError::Codec(e.to_string()))?;

        let mut metadata = BlobMetadata::new();
        metadata.insert(
            "snapshotversion".to_string(),
            snapshot.snapshot_version.to_string(),
        );
        metadata.insert(
            "lasteventversion".to_string(),
            snapshot.last_event_version.to_string(),
        );

        match self.blob.put_if_absent(&key, body, metadata).await {
            Ok(()) => Ok(()),
            Err(BlobStoreError::PreconditionFailed { .. }) => {
                warn!(key, "snapshot already exists; keeping the first writer's copy");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobStore;
    use chrono::Utc;
    use serde_json::json;

    fn store() -> (Arc<InMemoryBlobStore>, EventStore) {
        let blob = Arc::new(InMemoryBlobStore::new());
        (blob.clone(), EventStore::new(blob))
    }

    fn make_event(stream_id: Uuid, version: u64) -> RecordedEvent {
        RecordedEvent {
            event_id: Uuid::now_v7(),
            stream_id,
            stream_type: StreamType::Resource,
            version,
            event_type: "ResourceCreated".to_string(),
            payload: json!({"name": "SalaA", "details": "Piso 1"}),
            occurred_at_utc: Utc::now(),
            meta: json!({}),
        }
    }

    fn make_snapshot(stream_id: Uuid, version: u64) -> StreamSnapshot {
        StreamSnapshot {
            stream_type: StreamType::Resource,
            stream_id,
            snapshot_version: version,
            last_event_version: version,
            state: json!({"reservations": []}),
            created_at_utc: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_then_load_returns_contiguous_stream() {
        let (_, store) = store();
        let stream_id = Uuid::now_v7();

        for version in 1..=5 {
            store
                .append_event(&make_event(stream_id, version), version - 1)
                .await
                .unwrap();
        }

        let events = store
            .load_stream(StreamType::Resource, stream_id, 1)
            .await
            .unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events.iter().map(|e| e.version).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );

        let tail = store
            .load_stream(StreamType::Resource, stream_id, 4)
            .await
            .unwrap();
        assert_eq!(
            tail.iter().map(|e| e.version).collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[tokio::test]
    async fn loading_an_empty_stream_yields_no_events() {
        let (_, store) = store();
        let events = store
            .load_stream(StreamType::User, Uuid::now_v7(), 1)
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn concurrent_writers_produce_exactly_one_winner() {
        let (_, store) = store();
        let stream_id = Uuid::now_v7();

        store
            .append_event(&make_event(stream_id, 1), 0)
            .await
            .unwrap();

        let err = store
            .append_event(&make_event(stream_id, 1), 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::VersionConflict { version: 1, .. }
        ));
    }

    #[tokio::test]
    async fn append_requires_the_next_version() {
        let (_, store) = store();
        let err = store
            .append_event(&make_event(Uuid::now_v7(), 3), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[tokio::test]
    async fn persistent_gap_is_surfaced_after_one_retry() {
        let (blob, store) = store();
        let stream_id = Uuid::now_v7();

        for version in 1..=3 {
            store
                .append_event(&make_event(stream_id, version), version - 1)
                .await
                .unwrap();
        }
        blob.remove(&event_key(StreamType::Resource, stream_id, 2));

        let err = store
            .load_stream(StreamType::Resource, stream_id, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::StreamGapDetected {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn latest_snapshot_wins_and_carries_metadata() {
        let (blob, store) = store();
        let stream_id = Uuid::now_v7();

        assert!(store
            .load_latest_snapshot(StreamType::Resource, stream_id)
            .await
            .unwrap()
            .is_none());

        store.put_snapshot(&make_snapshot(stream_id, 2)).await.unwrap();
        store.put_snapshot(&make_snapshot(stream_id, 4)).await.unwrap();

        let latest = store
            .load_latest_snapshot(StreamType::Resource, stream_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.snapshot_version, 4);

        let key = format!("snapshots/resource/{stream_id}/000000000002.json");
        let metadata = blob.metadata(&key).unwrap();
        assert_eq!(metadata.get("snapshotversion"), Some(&"2".to_string()));
        assert_eq!(metadata.get("lasteventversion"), Some(&"2".to_string()));
    }

    #[tokio::test]
    async fn duplicate_snapshot_write_is_not_an_error() {
        let (_, store) = store();
        let stream_id = Uuid::now_v7();

        store.put_snapshot(&make_snapshot(stream_id, 2)).await.unwrap();
        store.put_snapshot(&make_snapshot(stream_id, 2)).await.unwrap();
    }

    #[tokio::test]
    async fn inconsistent_snapshot_versions_are_rejected() {
        let (_, store) = store();
        let mut snapshot = make_snapshot(Uuid::now_v7(), 2);
        snapshot.last_event_version = 3;

        let err = store.put_snapshot(&snapshot).await.unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn keys_are_zero_padded_and_parse_back() {
        let stream_id = Uuid::now_v7();
        let key = event_key(StreamType::User, stream_id, 42);
        assert_eq!(key, format!("user/{stream_id}/000000000042.json"));
        assert_eq!(parse_version(&key), Some(42));
        assert_eq!(parse_version("user/x/garbage.json"), None);
        assert_eq!(parse_version("user/x/000000000001.txt"), None);
    }
}
