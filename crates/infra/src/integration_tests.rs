//! End-to-end tests over the in-memory backends: command runner → queue →
//! projection worker → query tables.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use reserva_core::{DomainError, ReservationId, ResourceId, Role, StreamType, UserId};
use reserva_events::CommandMeta;
use reserva_resources::{
    CancelReservationInResource, CreateReservationInResource, CreateResource, Resource,
    ResourceCommand, ReservationStatus,
};
use reserva_users::{BootstrapAdmin, User, UserCommand};

use crate::blob::InMemoryBlobStore;
use crate::event_store::{EventStore, EventStoreError};
use crate::projection::{InMemoryProjectionStore, ProjectionStore, ReservationFilter};
use crate::queue::{EventQueue, InMemoryEventQueue};
use crate::runner::{CommandRunner, RunnerError, SnapshotPolicy};
use crate::worker::ProjectionWorker;

struct Harness {
    blob: Arc<InMemoryBlobStore>,
    queue: Arc<InMemoryEventQueue>,
    projections: Arc<InMemoryProjectionStore>,
    runner: CommandRunner,
    worker: ProjectionWorker,
}

fn harness(snapshots: SnapshotPolicy, retries: u32) -> Harness {
    let blob = Arc::new(InMemoryBlobStore::new());
    let queue = Arc::new(InMemoryEventQueue::new());
    let projections = Arc::new(InMemoryProjectionStore::new());
    let runner = CommandRunner::new(
        EventStore::new(blob.clone()),
        Some(queue.clone()),
        snapshots,
        retries,
        false,
    );
    let worker = ProjectionWorker::new(queue.clone(), projections.clone());
    Harness {
        blob,
        queue,
        projections,
        runner,
        worker,
    }
}

async fn drain(worker: &ProjectionWorker) {
    while worker.tick().await.unwrap() > 0 {}
}

fn at(hour: u32, minute: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 12, 1, hour, minute, 0).unwrap()
}

async fn bootstrap_admin(h: &Harness) -> UserId {
    let user_id = UserId::new();
    h.runner
        .execute::<User>(
            StreamType::User,
            *user_id.as_uuid(),
            &UserCommand::BootstrapAdmin(BootstrapAdmin {
                user_id,
                email: "admin@test.com".to_string(),
                password_hash: "$argon2id$stub".to_string(),
                occurred_at_utc: at(7, 0),
            }),
            CommandMeta::with_actor("BootstrapAdmin", user_id),
        )
        .await
        .unwrap();
    user_id
}

async fn create_resource(h: &Harness) -> ResourceId {
    let resource_id = ResourceId::new();
    h.runner
        .execute::<Resource>(
            StreamType::Resource,
            *resource_id.as_uuid(),
            &ResourceCommand::CreateResource(CreateResource {
                resource_id,
                name: "SalaA".to_string(),
                details: "Piso 1".to_string(),
                actor_role: Role::Admin,
                occurred_at_utc: at(8, 0),
            }),
            CommandMeta::new("CreateResource"),
        )
        .await
        .unwrap();
    resource_id
}

fn reserve(
    resource_id: ResourceId,
    user_id: UserId,
    from: chrono::DateTime<Utc>,
    to: chrono::DateTime<Utc>,
) -> ResourceCommand {
    ResourceCommand::CreateReservationInResource(CreateReservationInResource {
        resource_id,
        reservation_id: ReservationId::new(),
        user_id,
        from_utc: from,
        to_utc: to,
        now_utc: at(9, 0),
        occurred_at_utc: at(9, 0),
    })
}

#[tokio::test]
async fn bootstrap_create_reserve_overlap_rejected() {
    let h = harness(SnapshotPolicy::disabled(), 1);

    let admin = bootstrap_admin(&h).await;
    let resource_id = create_resource(&h).await;

    // [10:00, 11:00) succeeds.
    h.runner
        .execute::<Resource>(
            StreamType::Resource,
            *resource_id.as_uuid(),
            &reserve(resource_id, admin, at(10, 0), at(11, 0)),
            CommandMeta::with_actor("CreateReservationInResource", admin),
        )
        .await
        .unwrap();

    // [10:30, 11:30) overlaps and is rejected.
    let err = h
        .runner
        .execute::<Resource>(
            StreamType::Resource,
            *resource_id.as_uuid(),
            &reserve(resource_id, admin, at(10, 30), at(11, 30)),
            CommandMeta::with_actor("CreateReservationInResource", admin),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Domain(DomainError::ReservationOverlap)
    ));

    // [11:00, 12:00) touches the half-open boundary and succeeds.
    h.runner
        .execute::<Resource>(
            StreamType::Resource,
            *resource_id.as_uuid(),
            &reserve(resource_id, admin, at(11, 0), at(12, 0)),
            CommandMeta::with_actor("CreateReservationInResource", admin),
        )
        .await
        .unwrap();

    // Project everything and check the query side.
    drain(&h.worker).await;

    let user_row = h.projections.get_user(admin).await.unwrap().unwrap();
    assert_eq!(user_row.role, Role::Admin);
    assert_eq!(user_row.email, "admin@test.com");

    let resource_row = h
        .projections
        .get_resource(resource_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resource_row.name, "SalaA");
    assert_eq!(resource_row.status, "active");

    let page = h
        .projections
        .list_reservations(ReservationFilter::default(), 20, None)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(page
        .items
        .iter()
        .all(|r| r.status == ReservationStatus::Active));

    let lag = h.projections.get_lag().await.unwrap().unwrap();
    assert_eq!(lag.events_behind, 0);
}

#[tokio::test]
async fn cancellation_flows_through_to_the_projection() {
    let h = harness(SnapshotPolicy::disabled(), 1);
    let owner = UserId::new();
    let resource_id = create_resource(&h).await;

    let committed = h
        .runner
        .execute::<Resource>(
            StreamType::Resource,
            *resource_id.as_uuid(),
            &reserve(resource_id, owner, at(10, 0), at(11, 0)),
            CommandMeta::with_actor("CreateReservationInResource", owner),
        )
        .await
        .unwrap();
    let reservation_id: ReservationId = committed.recorded.payload["reservationId"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    // Non-owner cancel is rejected; admin cancel succeeds.
    let stranger = UserId::new();
    let err = h
        .runner
        .execute::<Resource>(
            StreamType::Resource,
            *resource_id.as_uuid(),
            &ResourceCommand::CancelReservationInResource(CancelReservationInResource {
                resource_id,
                reservation_id,
                actor_user_id: stranger,
                actor_role: Role::User,
                occurred_at_utc: at(9, 30),
            }),
            CommandMeta::with_actor("CancelReservationInResource", stranger),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Domain(DomainError::UnauthorizedCancel)
    ));

    let admin = UserId::new();
    h.runner
        .execute::<Resource>(
            StreamType::Resource,
            *resource_id.as_uuid(),
            &ResourceCommand::CancelReservationInResource(CancelReservationInResource {
                resource_id,
                reservation_id,
                actor_user_id: admin,
                actor_role: Role::Admin,
                occurred_at_utc: at(9, 45),
            }),
            CommandMeta::with_actor("CancelReservationInResource", admin),
        )
        .await
        .unwrap();

    drain(&h.worker).await;

    let page = h
        .projections
        .list_reservations(
            ReservationFilter {
                user_id: Some(owner),
                status: None,
            },
            20,
            None,
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].status, ReservationStatus::Cancelled);
    assert_eq!(page.items[0].cancelled_at_utc, Some(at(9, 45)));
}

#[tokio::test]
async fn snapshot_lands_at_the_documented_key_and_gap_is_detected() {
    let policy = SnapshotPolicy::new(500, HashMap::from([(StreamType::Resource, 2)]));
    let h = harness(policy, 1);
    let resource_id = create_resource(&h).await;
    let stream_id = *resource_id.as_uuid();

    h.runner
        .execute::<Resource>(
            StreamType::Resource,
            stream_id,
            &reserve(resource_id, UserId::new(), at(10, 0), at(11, 0)),
            CommandMeta::new("CreateReservationInResource"),
        )
        .await
        .unwrap();

    // Two appends with threshold 2: the snapshot exists at exactly this key.
    let snapshot_key = format!("snapshots/resource/{stream_id}/000000000002.json");
    assert!(h.blob.metadata(&snapshot_key).is_some());

    // Third event, then simulate a hole at v=2: the loader retries once and
    // surfaces the gap.
    h.runner
        .execute::<Resource>(
            StreamType::Resource,
            stream_id,
            &reserve(resource_id, UserId::new(), at(12, 0), at(13, 0)),
            CommandMeta::new("CreateReservationInResource"),
        )
        .await
        .unwrap();
    h.blob.remove(&format!("resource/{stream_id}/000000000002.json"));

    let err = h
        .runner
        .event_store()
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

    // Rehydration still works: the snapshot covers versions 1-2 and the tail
    // starts at 3.
    let (resource, last_version) = h
        .runner
        .rehydrate::<Resource>(StreamType::Resource, stream_id)
        .await
        .unwrap();
    assert_eq!(last_version, 3);
    assert_eq!(resource.reservations.len(), 2);
}

#[tokio::test]
async fn concurrent_writers_one_winner_per_slot() {
    let h = harness(SnapshotPolicy::disabled(), 1);
    let resource_id = create_resource(&h).await;
    let stream_id = *resource_id.as_uuid();

    // Four writers race for the same interval. Whoever appends first wins;
    // the rest either lose the version race or get an overlap rejection on
    // their retry.
    let mut handles = Vec::new();
    for _ in 0..4 {
        let runner = h.runner.clone();
        let command = reserve(resource_id, UserId::new(), at(10, 0), at(11, 0));
        handles.push(tokio::spawn(async move {
            runner
                .execute::<Resource>(
                    StreamType::Resource,
                    stream_id,
                    &command,
                    CommandMeta::new("CreateReservationInResource"),
                )
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(RunnerError::Domain(DomainError::ReservationOverlap))
            | Err(RunnerError::VersionConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(successes, 1);

    let events = h
        .runner
        .event_store()
        .load_stream(StreamType::Resource, stream_id, 1)
        .await
        .unwrap();
    // Create + exactly one accepted reservation; the stream's final version
    // equals the number of appended events.
    assert_eq!(events.len(), 2);
    assert_eq!(events.last().unwrap().version, events.len() as u64);
}

#[tokio::test]
async fn queueless_mode_still_commits_events() {
    let blob = Arc::new(InMemoryBlobStore::new());
    let runner = CommandRunner::new(
        EventStore::new(blob.clone()),
        None,
        SnapshotPolicy::disabled(),
        1,
        false,
    );

    let resource_id = ResourceId::new();
    runner
        .execute::<Resource>(
            StreamType::Resource,
            *resource_id.as_uuid(),
            &ResourceCommand::CreateResource(CreateResource {
                resource_id,
                name: "SalaA".to_string(),
                details: "Piso 1".to_string(),
                actor_role: Role::Admin,
                occurred_at_utc: at(8, 0),
            }),
            CommandMeta::new("CreateResource"),
        )
        .await
        .unwrap();

    assert_eq!(blob.len(), 1);
}

#[tokio::test]
async fn published_queue_drains_to_empty() {
    let h = harness(SnapshotPolicy::disabled(), 1);
    bootstrap_admin(&h).await;
    let resource_id = create_resource(&h).await;
    h.runner
        .execute::<Resource>(
            StreamType::Resource,
            *resource_id.as_uuid(),
            &reserve(resource_id, UserId::new(), at(10, 0), at(11, 0)),
            CommandMeta::new("CreateReservationInResource"),
        )
        .await
        .unwrap();

    assert_eq!(h.queue.pending_len(), 3);
    drain(&h.worker).await;
    assert_eq!(h.queue.pending_len(), 0);
    assert_eq!(h.queue.in_flight_len(), 0);
}
