//! Command execution pipeline.
//!
//! Flow per attempt:
//! load snapshot → load tail → fold → decide → conditional append → publish →
//! maybe snapshot. A `VERSION_CONFLICT` from the append restarts the attempt,
//! bounded by `version_conflict_max_retries`.
//!
//! Publish and snapshot are best-effort: their failures are logged and
//! swallowed, never surfaced to the caller (the state change is already
//! durable once the append succeeds).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use reserva_core::{Aggregate, DomainError, StreamType};
use reserva_events::{CommandMeta, Event, RecordedEvent, StreamSnapshot};

use crate::config::Config;
use crate::event_store::{EventStore, EventStoreError};
use crate::queue::EventQueue;

/// Telemetry event appended when a command exhausts its conflict retries.
pub const CONCURRENCY_CONFLICT_UNRESOLVED: &str = "ConcurrencyConflictUnresolved";

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The decider rejected the command.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Conflict retries exhausted; the client may retry the whole command.
    #[error("version conflict after {attempts} attempt(s)")]
    VersionConflict { attempts: u32 },

    /// Event store failure (gap detection, storage, codec).
    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// Snapshot state failed to decode into the aggregate type.
    #[error("snapshot codec error: {0}")]
    SnapshotCodec(String),
}

/// Per-stream-type snapshot thresholds (`0` disables).
#[derive(Debug, Clone)]
pub struct SnapshotPolicy {
    every_default: u64,
    by_stream_type: HashMap<StreamType, u64>,
}

impl SnapshotPolicy {
    pub fn new(every_default: u64, by_stream_type: HashMap<StreamType, u64>) -> Self {
        Self {
            every_default,
            by_stream_type,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.snapshot_every_default,
            config.snapshot_by_stream_type.clone(),
        )
    }

    pub fn disabled() -> Self {
        Self::new(0, HashMap::new())
    }

    pub fn threshold(&self, stream_type: StreamType) -> u64 {
        self.by_stream_type
            .get(&stream_type)
            .copied()
            .unwrap_or(self.every_default)
    }
}

/// The committed outcome of a command: the typed event plus its stored form.
#[derive(Debug, Clone)]
pub struct Committed<E> {
    pub event: E,
    pub recorded: RecordedEvent,
}

/// Reusable command execution engine.
#[derive(Clone)]
pub struct CommandRunner {
    store: EventStore,
    queue: Option<Arc<dyn EventQueue>>,
    snapshots: SnapshotPolicy,
    version_conflict_max_retries: u32,
    emit_conflict_telemetry: bool,
}

impl CommandRunner {
    pub fn new(
        store: EventStore,
        queue: Option<Arc<dyn EventQueue>>,
        snapshots: SnapshotPolicy,
        version_conflict_max_retries: u32,
        emit_conflict_telemetry: bool,
    ) -> Self {
        Self {
            store,
            queue,
            snapshots,
            version_conflict_max_retries,
            emit_conflict_telemetry,
        }
    }

    pub fn from_config(
        store: EventStore,
        queue: Option<Arc<dyn EventQueue>>,
        config: &Config,
    ) -> Self {
        Self::new(
            store,
            queue,
            SnapshotPolicy::from_config(config),
            config.version_conflict_max_retries,
            config.emit_concurrency_conflict_unresolved_event,
        )
    }

    pub fn event_store(&self) -> &EventStore {
        &self.store
    }

    /// Rebuild aggregate state: latest snapshot plus its event tail.
    ///
    /// Returns the folded aggregate and the stream's last event version.
    /// Recorded events whose type tag is not part of the aggregate's event
    /// union (e.g. telemetry events) fold as identity.
    pub async fn rehydrate<A>(
        &self,
        stream_type: StreamType,
        stream_id: Uuid,
    ) -> Result<(A, u64), RunnerError>
    where
        A: Aggregate + Default + DeserializeOwned,
        A::Event: Event,
    {
        let snapshot = self.store.load_latest_snapshot(stream_type, stream_id).await?;

        let (mut aggregate, mut last_version) = match snapshot {
            Some(snapshot) => {
                let aggregate: A = serde_json::from_value(snapshot.state)
                    .map_err(|e| RunnerError::SnapshotCodec(e.to_string()))?;
                (aggregate, snapshot.last_event_version)
            }
            None => (A::default(), 0),
        };

        let tail = self
            .store
            .load_stream(stream_type, stream_id, last_version + 1)
            .await?;

        for recorded in &tail {
            if let Some(event) = recorded.to_typed::<A::Event>() {
                aggregate.apply(&event);
            }
            last_version = recorded.version;
        }

        Ok((aggregate, last_version))
    }

    /// Dispatch a command through the full pipeline.
    pub async fn execute<A>(
        &self,
        stream_type: StreamType,
        stream_id: Uuid,
        command: &A::Command,
        meta: CommandMeta,
    ) -> Result<Committed<A::Event>, RunnerError>
    where
        A: Aggregate<Error = DomainError> + Default + Serialize + DeserializeOwned,
        A::Event: Event,
    {
        let max_attempts = self.version_conflict_max_retries.saturating_add(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            // 1) Rehydrate
            let (mut aggregate, last_version) =
                self.rehydrate::<A>(stream_type, stream_id).await?;

            // 2) Decide (pure; rejections short-circuit)
            let event = aggregate.handle(command)?;

            // 3) Conditional append at the next version slot
            let recorded = RecordedEvent::from_typed(
                stream_type,
                stream_id,
                last_version + 1,
                &event,
                meta.to_json(),
            )
            .map_err(|e| EventStoreError::Codec(e.to_string()))?;

            match self.store.append_event(&recorded, last_version).await {
                Ok(()) => {
                    // 4) Publish, then maybe snapshot; both best-effort.
                    self.publish(&recorded).await;

                    aggregate.apply(&event);
                    self.maybe_snapshot(&aggregate, stream_type, stream_id, recorded.version)
                        .await;

                    return Ok(Committed { event, recorded });
                }
                Err(EventStoreError::VersionConflict { version, .. }) => {
                    if attempt < max_attempts {
                        debug!(
                            stream_type = %stream_type,
                            stream_id = %stream_id,
                            version,
                            attempt,
                            "version conflict; retrying command"
                        );
                        continue;
                    }

                    if self.emit_conflict_telemetry {
                        self.append_conflict_telemetry(stream_type, stream_id, &meta, attempt)
                            .await;
                    }
                    return Err(RunnerError::VersionConflict { attempts: attempt });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn publish(&self, recorded: &RecordedEvent) {
        let Some(queue) = &self.queue else {
            return;
        };

        match serde_json::to_string(recorded) {
            Ok(body) => {
                if let Err(err) = queue.publish(body).await {
                    warn!(
                        event_id = %recorded.event_id,
                        error = %err,
                        "event publish failed; projection relies on redrive"
                    );
                }
            }
            Err(err) => {
                warn!(event_id = %recorded.event_id, error = %err, "event publish encode failed");
            }
        }
    }

    async fn maybe_snapshot<A>(
        &self,
        aggregate: &A,
        stream_type: StreamType,
        stream_id: Uuid,
        new_version: u64,
    ) where
        A: Serialize,
    {
        let threshold = self.snapshots.threshold(stream_type);
        if threshold == 0 || new_version % threshold != 0 {
            return;
        }

        let state = match serde_json::to_value(aggregate) {
            Ok(state) => state,
            Err(err) => {
                warn!(stream_id = %stream_id, error = %err, "snapshot state encode failed");
                return;
            }
        };

        let snapshot = StreamSnapshot {
            stream_type,
            stream_id,
            snapshot_version: new_version,
            last_event_version: new_version,
            state,
            created_at_utc: Utc::now(),
        };

        if let Err(err) = self.store.put_snapshot(&snapshot).await {
            warn!(stream_id = %stream_id, version = new_version, error = %err, "snapshot write failed");
        }
    }

    /// Best-effort audit trail for an unresolved conflict; every failure in
    /// here is swallowed.
    async fn append_conflict_telemetry(
        &self,
        stream_type: StreamType,
        stream_id: Uuid,
        meta: &CommandMeta,
        attempts: u32,
    ) {
        let tail_version = match self.store.load_stream(stream_type, stream_id, 1).await {
            Ok(events) => events.last().map(|e| e.version).unwrap_or(0),
            Err(err) => {
                debug!(stream_id = %stream_id, error = %err, "conflict telemetry reload failed");
                return;
            }
        };

        let recorded = RecordedEvent {
            event_id: Uuid::now_v7(),
            stream_id,
            stream_type,
            version: tail_version + 1,
            event_type: CONCURRENCY_CONFLICT_UNRESOLVED.to_string(),
            payload: json!({
                "resourceId": stream_id,
                "commandName": meta.command_name,
                "actorUserId": meta.actor_user_id,
                "attempts": attempts,
                "lastKnownVersion": tail_version,
            }),
            occurred_at_utc: Utc::now(),
            meta: meta.to_json(),
        };

        if let Err(err) = self.store.append_event(&recorded, tail_version).await {
            debug!(stream_id = %stream_id, error = %err, "conflict telemetry append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobMetadata, BlobStore, BlobStoreError, InMemoryBlobStore};
    use crate::queue::InMemoryEventQueue;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use reserva_core::{ReservationId, ResourceId, Role, UserId};
    use reserva_resources::{
        CreateReservationInResource, CreateResource, Resource, ResourceCommand,
    };
    use std::sync::Mutex;

    /// Blob store that fails the first `failures` conditional puts, modeling
    /// concurrent writers stealing version slots.
    struct ConflictInjectingBlobStore {
        inner: InMemoryBlobStore,
        failures: Mutex<u32>,
    }

    impl ConflictInjectingBlobStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: InMemoryBlobStore::new(),
                failures: Mutex::new(failures),
            }
        }
    }

    #[async_trait]
    impl BlobStore for ConflictInjectingBlobStore {
        async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
            self.inner.list_keys(prefix).await
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
            self.inner.get(key).await
        }

        async fn put_if_absent(
            &self,
            key: &str,
            body: Vec<u8>,
            metadata: BlobMetadata,
        ) -> Result<(), BlobStoreError> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(BlobStoreError::PreconditionFailed {
                        key: key.to_string(),
                    });
                }
            }
            self.inner.put_if_absent(key, body, metadata).await
        }
    }

    fn at(hour: u32, minute: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 12, 1, hour, minute, 0).unwrap()
    }

    fn create_cmd(resource_id: ResourceId) -> ResourceCommand {
        ResourceCommand::CreateResource(CreateResource {
            resource_id,
            name: "SalaA".to_string(),
            details: "Piso 1".to_string(),
            actor_role: Role::Admin,
            occurred_at_utc: at(8, 0),
        })
    }

    fn reserve_cmd(resource_id: ResourceId, from_h: u32, to_h: u32) -> ResourceCommand {
        ResourceCommand::CreateReservationInResource(CreateReservationInResource {
            resource_id,
            reservation_id: ReservationId::new(),
            user_id: UserId::new(),
            from_utc: at(from_h, 0),
            to_utc: at(to_h, 0),
            now_utc: at(9, 0),
            occurred_at_utc: at(9, 0),
        })
    }

    fn runner_with(
        blob: Arc<dyn BlobStore>,
        queue: Option<Arc<dyn EventQueue>>,
        snapshots: SnapshotPolicy,
        retries: u32,
        telemetry: bool,
    ) -> CommandRunner {
        CommandRunner::new(EventStore::new(blob), queue, snapshots, retries, telemetry)
    }

    #[tokio::test]
    async fn accepted_command_appends_and_publishes() {
        let queue = Arc::new(InMemoryEventQueue::new());
        let runner = runner_with(
            Arc::new(InMemoryBlobStore::new()),
            Some(queue.clone()),
            SnapshotPolicy::disabled(),
            1,
            false,
        );
        let resource_id = ResourceId::new();

        let committed = runner
            .execute::<Resource>(
                StreamType::Resource,
                *resource_id.as_uuid(),
                &create_cmd(resource_id),
                CommandMeta::new("CreateResource"),
            )
            .await
            .unwrap();

        assert_eq!(committed.recorded.version, 1);
        assert_eq!(committed.recorded.event_type, "ResourceCreated");
        assert_eq!(committed.recorded.meta["commandName"], "CreateResource");

        let messages = queue.receive(10).await.unwrap();
        assert_eq!(messages.len(), 1);
        let published: RecordedEvent = serde_json::from_str(&messages[0].body).unwrap();
        assert_eq!(published, committed.recorded);
    }

    #[tokio::test]
    async fn rejected_command_appends_nothing() {
        let blob = Arc::new(InMemoryBlobStore::new());
        let runner = runner_with(blob.clone(), None, SnapshotPolicy::disabled(), 1, false);
        let resource_id = ResourceId::new();

        // Reservation against a missing resource is rejected by the decider.
        let err = runner
            .execute::<Resource>(
                StreamType::Resource,
                *resource_id.as_uuid(),
                &reserve_cmd(resource_id, 10, 11),
                CommandMeta::new("CreateReservationInResource"),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RunnerError::Domain(DomainError::ResourceNotFound)
        ));
        assert!(blob.is_empty());
    }

    #[tokio::test]
    async fn conflict_is_retried_within_budget() {
        let blob = Arc::new(ConflictInjectingBlobStore::new(1));
        let runner = runner_with(blob, None, SnapshotPolicy::disabled(), 1, false);
        let resource_id = ResourceId::new();

        let committed = runner
            .execute::<Resource>(
                StreamType::Resource,
                *resource_id.as_uuid(),
                &create_cmd(resource_id),
                CommandMeta::new("CreateResource"),
            )
            .await
            .unwrap();
        assert_eq!(committed.recorded.version, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_version_conflict() {
        let blob = Arc::new(ConflictInjectingBlobStore::new(10));
        let runner = runner_with(blob, None, SnapshotPolicy::disabled(), 1, false);
        let resource_id = ResourceId::new();

        let err = runner
            .execute::<Resource>(
                StreamType::Resource,
                *resource_id.as_uuid(),
                &create_cmd(resource_id),
                CommandMeta::new("CreateResource"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::VersionConflict { attempts: 2 }));
    }

    #[tokio::test]
    async fn zero_retries_means_a_single_attempt() {
        let blob = Arc::new(ConflictInjectingBlobStore::new(1));
        let runner = runner_with(blob, None, SnapshotPolicy::disabled(), 0, false);
        let resource_id = ResourceId::new();

        let err = runner
            .execute::<Resource>(
                StreamType::Resource,
                *resource_id.as_uuid(),
                &create_cmd(resource_id),
                CommandMeta::new("CreateResource"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::VersionConflict { attempts: 1 }));
    }

    #[tokio::test]
    async fn unresolved_conflict_appends_telemetry_when_enabled() {
        // First put (the command) conflicts; the telemetry append goes through.
        let blob = Arc::new(ConflictInjectingBlobStore::new(1));
        let runner = runner_with(blob, None, SnapshotPolicy::disabled(), 0, true);
        let resource_id = ResourceId::new();
        let actor = UserId::new();

        let err = runner
            .execute::<Resource>(
                StreamType::Resource,
                *resource_id.as_uuid(),
                &create_cmd(resource_id),
                CommandMeta::with_actor("CreateResource", actor),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::VersionConflict { .. }));

        let events = runner
            .event_store()
            .load_stream(StreamType::Resource, *resource_id.as_uuid(), 1)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, CONCURRENCY_CONFLICT_UNRESOLVED);
        assert_eq!(events[0].payload["commandName"], "CreateResource");
        assert_eq!(events[0].payload["attempts"], 1);
        assert_eq!(events[0].payload["lastKnownVersion"], 0);
    }

    #[tokio::test]
    async fn telemetry_events_fold_as_identity_on_rehydrate() {
        let blob = Arc::new(ConflictInjectingBlobStore::new(0));
        let runner = runner_with(blob, None, SnapshotPolicy::disabled(), 1, true);
        let resource_id = ResourceId::new();
        let stream_id = *resource_id.as_uuid();

        runner
            .execute::<Resource>(
                StreamType::Resource,
                stream_id,
                &create_cmd(resource_id),
                CommandMeta::new("CreateResource"),
            )
            .await
            .unwrap();

        // Hand-append a telemetry event at the tail.
        runner
            .append_conflict_telemetry(
                StreamType::Resource,
                stream_id,
                &CommandMeta::new("CreateReservationInResource"),
                2,
            )
            .await;

        let (resource, last_version) = runner
            .rehydrate::<Resource>(StreamType::Resource, stream_id)
            .await
            .unwrap();
        assert_eq!(last_version, 2);
        assert!(resource.created);
        // Identity fold: the aggregate saw one event, the stream holds two.
        assert_eq!(resource.version, 1);
    }

    #[tokio::test]
    async fn threshold_snapshots_are_written_and_used() {
        let blob = Arc::new(InMemoryBlobStore::new());
        let policy = SnapshotPolicy::new(500, HashMap::from([(StreamType::Resource, 2)]));
        let runner = runner_with(blob.clone(), None, policy, 1, false);
        let resource_id = ResourceId::new();
        let stream_id = *resource_id.as_uuid();

        runner
            .execute::<Resource>(
                StreamType::Resource,
                stream_id,
                &create_cmd(resource_id),
                CommandMeta::new("CreateResource"),
            )
            .await
            .unwrap();
        runner
            .execute::<Resource>(
                StreamType::Resource,
                stream_id,
                &reserve_cmd(resource_id, 10, 11),
                CommandMeta::new("CreateReservationInResource"),
            )
            .await
            .unwrap();

        let snapshot = runner
            .event_store()
            .load_latest_snapshot(StreamType::Resource, stream_id)
            .await
            .unwrap()
            .expect("snapshot at version 2");
        assert_eq!(snapshot.snapshot_version, 2);

        // Third event lands on top of the snapshot.
        runner
            .execute::<Resource>(
                StreamType::Resource,
                stream_id,
                &reserve_cmd(resource_id, 12, 13),
                CommandMeta::new("CreateReservationInResource"),
            )
            .await
            .unwrap();

        // Snapshot + tail must equal a full fold from version 1.
        let (from_snapshot, last) = runner
            .rehydrate::<Resource>(StreamType::Resource, stream_id)
            .await
            .unwrap();
        assert_eq!(last, 3);

        let cold_runner = runner_with(
            blob_without_snapshots(&blob).await,
            None,
            SnapshotPolicy::disabled(),
            1,
            false,
        );
        let (from_scratch, _) = cold_runner
            .rehydrate::<Resource>(StreamType::Resource, stream_id)
            .await
            .unwrap();

        assert_eq!(from_snapshot, from_scratch);
    }

    /// Copy only event objects into a fresh store, dropping snapshots.
    async fn blob_without_snapshots(source: &Arc<InMemoryBlobStore>) -> Arc<InMemoryBlobStore> {
        let target = Arc::new(InMemoryBlobStore::new());
        for key in source.list_keys("").await.unwrap() {
            if key.starts_with("snapshots/") {
                continue;
            }
            let body = source.get(&key).await.unwrap();
            target
                .put_if_absent(&key, body, BlobMetadata::new())
                .await
                .unwrap();
        }
        target
    }
}
