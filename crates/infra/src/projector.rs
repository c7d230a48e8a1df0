//! Pure projector: one recorded event in, an ordered list of projection ops
//! out.
//!
//! The projector is a total match over the event type tag. Every op it emits
//! is idempotent against the projection store, so at-least-once delivery
//! re-applies to the same end-state.

use chrono::{DateTime, Utc};

use reserva_core::{ReservationId, ResourceId, StreamType, UserId};
use reserva_events::{Event, RecordedEvent};
use reserva_resources::{ReservationStatus, ResourceEvent};
use reserva_users::UserEvent;

use crate::projection::{
    ProjectionStore, ProjectionStoreError, ReservationRow, ResourceRow, UserRow,
};

/// One idempotent write against the query side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionOp {
    PutUser(UserRow),
    SetUserLastLogin {
        user_id: UserId,
        last_login_at_utc: DateTime<Utc>,
    },
    PutResource(ResourceRow),
    UpdateResourceDetails {
        resource_id: ResourceId,
        name: String,
        details: String,
        updated_at_utc: DateTime<Utc>,
    },
    PutReservation(ReservationRow),
    CancelReservation {
        reservation_id: ReservationId,
        cancelled_at_utc: DateTime<Utc>,
    },
}

/// Map a recorded event to its projection ops. Unrecognized event types
/// (telemetry, future additions) project to nothing.
pub fn project(recorded: &RecordedEvent) -> Vec<ProjectionOp> {
    match recorded.stream_type {
        StreamType::User => project_user(recorded),
        StreamType::Resource => project_resource(recorded),
    }
}

fn project_user(recorded: &RecordedEvent) -> Vec<ProjectionOp> {
    let Some(event) = UserEvent::decode(&recorded.event_type, &recorded.payload) else {
        return vec![];
    };

    match event {
        UserEvent::AdminBootstrapped(e) => vec![ProjectionOp::PutUser(UserRow {
            user_id: e.user_id,
            email: e.email,
            role: e.role,
            created_at_utc: recorded.occurred_at_utc,
            last_login_at_utc: None,
        })],
        UserEvent::UserRegistered(e) => vec![ProjectionOp::PutUser(UserRow {
            user_id: e.user_id,
            email: e.email,
            role: e.role,
            created_at_utc: recorded.occurred_at_utc,
            last_login_at_utc: None,
        })],
        UserEvent::UserLoggedIn(e) => vec![ProjectionOp::SetUserLastLogin {
            user_id: e.user_id,
            last_login_at_utc: recorded.occurred_at_utc,
        }],
    }
}

fn project_resource(recorded: &RecordedEvent) -> Vec<ProjectionOp> {
    let Some(event) = ResourceEvent::decode(&recorded.event_type, &recorded.payload) else {
        return vec![];
    };

    match event {
        ResourceEvent::ResourceCreated(e) => vec![ProjectionOp::PutResource(ResourceRow {
            resource_id: e.resource_id,
            name: e.name,
            details: e.details,
            status: "active".to_string(),
            created_at_utc: recorded.occurred_at_utc,
            updated_at_utc: recorded.occurred_at_utc,
        })],
        ResourceEvent::ResourceMetadataUpdated(e) => vec![ProjectionOp::UpdateResourceDetails {
            resource_id: e.resource_id,
            name: e.name,
            details: e.details,
            updated_at_utc: recorded.occurred_at_utc,
        }],
        ResourceEvent::ReservationAddedToResource(e) => {
            vec![ProjectionOp::PutReservation(ReservationRow {
                reservation_id: e.reservation_id,
                resource_id: e.resource_id,
                user_id: e.user_id,
                from_utc: e.from_utc,
                to_utc: e.to_utc,
                status: ReservationStatus::Active,
                created_at_utc: recorded.occurred_at_utc,
                cancelled_at_utc: None,
            })]
        }
        ResourceEvent::ResourceReservationCancelled(e) => vec![ProjectionOp::CancelReservation {
            reservation_id: e.reservation_id,
            cancelled_at_utc: e.cancelled_at_utc,
        }],
    }
}

/// Apply one op against the projection store.
pub async fn apply_op(
    store: &dyn ProjectionStore,
    op: ProjectionOp,
) -> Result<(), ProjectionStoreError> {
    match op {
        ProjectionOp::PutUser(row) => store.put_user(row).await,
        ProjectionOp::SetUserLastLogin {
            user_id,
            last_login_at_utc,
        } => store.set_user_last_login(user_id, last_login_at_utc).await,
        ProjectionOp::PutResource(row) => store.put_resource(row).await,
        ProjectionOp::UpdateResourceDetails {
            resource_id,
            name,
            details,
            updated_at_utc,
        } => {
            store
                .update_resource_details(resource_id, name, details, updated_at_utc)
                .await
        }
        ProjectionOp::PutReservation(row) => store.put_reservation(row).await,
        ProjectionOp::CancelReservation {
            reservation_id,
            cancelled_at_utc,
        } => store.cancel_reservation(reservation_id, cancelled_at_utc).await,
    }
}
