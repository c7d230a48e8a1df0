use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use reserva_core::{Aggregate, AggregateRoot, DomainError, ReservationId, ResourceId, Role, UserId};
use reserva_events::Event;

// ─────────────────────────────────────────────────────────────────────────────
// Reservation
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a reservation inside its owning resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Cancelled,
}

/// Resource status. The original system only ever creates active resources;
/// the enum exists so the stored form stays explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Active,
}

/// A reservation held by a resource.
///
/// Reservations exist only inside the resource aggregate; they are appended
/// and mutated exclusively through events on the owning resource stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub reservation_id: ReservationId,
    pub user_id: UserId,
    pub from_utc: DateTime<Utc>,
    pub to_utc: DateTime<Utc>,
    pub status: ReservationStatus,
    pub created_at_utc: DateTime<Utc>,
    pub cancelled_at_utc: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Half-open interval intersection: `[from, to)` vs this reservation.
    pub fn overlaps(&self, from_utc: DateTime<Utc>, to_utc: DateTime<Utc>) -> bool {
        from_utc < self.to_utc && self.from_utc < to_utc
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resource Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// Resource aggregate.
///
/// # Invariants
/// - Creation/metadata updates require an admin actor.
/// - No two active reservations overlap under half-open `[from, to)` semantics.
/// - Cancellation requires the original owner or an admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_id: ResourceId,
    pub name: String,
    pub details: String,
    pub status: ResourceStatus,
    pub reservations: Vec<Reservation>,
    pub version: u64,
    pub created: bool,
}

impl Default for Resource {
    fn default() -> Self {
        Self {
            resource_id: ResourceId::new(),
            name: String::new(),
            details: String::new(),
            status: ResourceStatus::Active,
            reservations: Vec::new(),
            version: 0,
            created: false,
        }
    }
}

impl Resource {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            ..Default::default()
        }
    }

    pub fn reservation(&self, reservation_id: ReservationId) -> Option<&Reservation> {
        self.reservations
            .iter()
            .find(|r| r.reservation_id == reservation_id)
    }
}

impl AggregateRoot for Resource {
    type Id = ResourceId;

    fn id(&self) -> &Self::Id {
        &self.resource_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Command: create a resource (admin only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResource {
    pub resource_id: ResourceId,
    pub name: String,
    pub details: String,
    pub actor_role: Role,
    pub occurred_at_utc: DateTime<Utc>,
}

/// Command: replace a resource's name/details (admin only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResourceMetadata {
    pub resource_id: ResourceId,
    pub name: String,
    pub details: String,
    pub actor_role: Role,
    pub occurred_at_utc: DateTime<Utc>,
}

/// Command: add a reservation to the resource.
///
/// `now_utc` is captured by the builder so the not-in-the-past check stays
/// deterministic inside the decider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReservationInResource {
    pub resource_id: ResourceId,
    pub reservation_id: ReservationId,
    pub user_id: UserId,
    pub from_utc: DateTime<Utc>,
    pub to_utc: DateTime<Utc>,
    pub now_utc: DateTime<Utc>,
    pub occurred_at_utc: DateTime<Utc>,
}

/// Command: cancel a reservation (owner or admin).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReservationInResource {
    pub resource_id: ResourceId,
    pub reservation_id: ReservationId,
    pub actor_user_id: UserId,
    pub actor_role: Role,
    pub occurred_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceCommand {
    CreateResource(CreateResource),
    UpdateResourceMetadata(UpdateResourceMetadata),
    CreateReservationInResource(CreateReservationInResource),
    CancelReservationInResource(CancelReservationInResource),
}

impl ResourceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceCommand::CreateResource(_) => "CreateResource",
            ResourceCommand::UpdateResourceMetadata(_) => "UpdateResourceMetadata",
            ResourceCommand::CreateReservationInResource(_) => "CreateReservationInResource",
            ResourceCommand::CancelReservationInResource(_) => "CancelReservationInResource",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCreated {
    pub resource_id: ResourceId,
    pub name: String,
    pub details: String,
    pub occurred_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadataUpdated {
    pub resource_id: ResourceId,
    pub name: String,
    pub details: String,
    pub occurred_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationAddedToResource {
    pub resource_id: ResourceId,
    pub reservation_id: ReservationId,
    pub user_id: UserId,
    pub from_utc: DateTime<Utc>,
    pub to_utc: DateTime<Utc>,
    pub occurred_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReservationCancelled {
    pub resource_id: ResourceId,
    pub reservation_id: ReservationId,
    pub cancelled_at_utc: DateTime<Utc>,
    pub occurred_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceEvent {
    ResourceCreated(ResourceCreated),
    ResourceMetadataUpdated(ResourceMetadataUpdated),
    ReservationAddedToResource(ReservationAddedToResource),
    ResourceReservationCancelled(ResourceReservationCancelled),
}

impl Event for ResourceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ResourceEvent::ResourceCreated(_) => "ResourceCreated",
            ResourceEvent::ResourceMetadataUpdated(_) => "ResourceMetadataUpdated",
            ResourceEvent::ReservationAddedToResource(_) => "ReservationAddedToResource",
            ResourceEvent::ResourceReservationCancelled(_) => "ResourceReservationCancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ResourceEvent::ResourceCreated(e) => e.occurred_at_utc,
            ResourceEvent::ResourceMetadataUpdated(e) => e.occurred_at_utc,
            ResourceEvent::ReservationAddedToResource(e) => e.occurred_at_utc,
            ResourceEvent::ResourceReservationCancelled(e) => e.occurred_at_utc,
        }
    }

    fn payload(&self) -> serde_json::Result<JsonValue> {
        match self {
            ResourceEvent::ResourceCreated(e) => serde_json::to_value(e),
            ResourceEvent::ResourceMetadataUpdated(e) => serde_json::to_value(e),
            ResourceEvent::ReservationAddedToResource(e) => serde_json::to_value(e),
            ResourceEvent::ResourceReservationCancelled(e) => serde_json::to_value(e),
        }
    }

    fn decode(event_type: &str, payload: &JsonValue) -> Option<Self> {
        match event_type {
            "ResourceCreated" => serde_json::from_value(payload.clone())
                .ok()
                .map(ResourceEvent::ResourceCreated),
            "ResourceMetadataUpdated" => serde_json::from_value(payload.clone())
                .ok()
                .map(ResourceEvent::ResourceMetadataUpdated),
            "ReservationAddedToResource" => serde_json::from_value(payload.clone())
                .ok()
                .map(ResourceEvent::ReservationAddedToResource),
            "ResourceReservationCancelled" => serde_json::from_value(payload.clone())
                .ok()
                .map(ResourceEvent::ResourceReservationCancelled),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for Resource {
    type Command = ResourceCommand;
    type Event = ResourceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ResourceEvent::ResourceCreated(e) => {
                self.resource_id = e.resource_id;
                self.name = e.name.clone();
                self.details = e.details.clone();
                self.status = ResourceStatus::Active;
                self.created = true;
            }
            ResourceEvent::ResourceMetadataUpdated(e) => {
                self.name = e.name.clone();
                self.details = e.details.clone();
            }
            ResourceEvent::ReservationAddedToResource(e) => {
                self.reservations.push(Reservation {
                    reservation_id: e.reservation_id,
                    user_id: e.user_id,
                    from_utc: e.from_utc,
                    to_utc: e.to_utc,
                    status: ReservationStatus::Active,
                    created_at_utc: e.occurred_at_utc,
                    cancelled_at_utc: None,
                });
            }
            ResourceEvent::ResourceReservationCancelled(e) => {
                if let Some(r) = self
                    .reservations
                    .iter_mut()
                    .find(|r| r.reservation_id == e.reservation_id)
                {
                    r.status = ReservationStatus::Cancelled;
                    r.cancelled_at_utc = Some(e.cancelled_at_utc);
                }
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Self::Event, Self::Error> {
        match command {
            ResourceCommand::CreateResource(cmd) => self.handle_create(cmd),
            ResourceCommand::UpdateResourceMetadata(cmd) => self.handle_update_metadata(cmd),
            ResourceCommand::CreateReservationInResource(cmd) => self.handle_create_reservation(cmd),
            ResourceCommand::CancelReservationInResource(cmd) => self.handle_cancel_reservation(cmd),
        }
    }
}

impl Resource {
    fn handle_create(&self, cmd: &CreateResource) -> Result<ResourceEvent, DomainError> {
        if !cmd.actor_role.is_admin() {
            return Err(DomainError::Forbidden);
        }
        if self.created {
            return Err(DomainError::ResourceAlreadyExists);
        }

        Ok(ResourceEvent::ResourceCreated(ResourceCreated {
            resource_id: cmd.resource_id,
            name: cmd.name.clone(),
            details: cmd.details.clone(),
            occurred_at_utc: cmd.occurred_at_utc,
        }))
    }

    fn handle_update_metadata(
        &self,
        cmd: &UpdateResourceMetadata,
    ) -> Result<ResourceEvent, DomainError> {
        if !cmd.actor_role.is_admin() {
            return Err(DomainError::Forbidden);
        }
        if !self.created {
            return Err(DomainError::ResourceNotFound);
        }

        Ok(ResourceEvent::ResourceMetadataUpdated(ResourceMetadataUpdated {
            resource_id: cmd.resource_id,
            name: cmd.name.clone(),
            details: cmd.details.clone(),
            occurred_at_utc: cmd.occurred_at_utc,
        }))
    }

    fn handle_create_reservation(
        &self,
        cmd: &CreateReservationInResource,
    ) -> Result<ResourceEvent, DomainError> {
        if !self.created {
            return Err(DomainError::ResourceNotFound);
        }
        if cmd.from_utc >= cmd.to_utc {
            return Err(DomainError::InvalidInterval);
        }
        if cmd.from_utc < cmd.now_utc {
            return Err(DomainError::ReservationInPast);
        }
        if self
            .reservations
            .iter()
            .any(|r| r.is_active() && r.overlaps(cmd.from_utc, cmd.to_utc))
        {
            return Err(DomainError::ReservationOverlap);
        }

        Ok(ResourceEvent::ReservationAddedToResource(ReservationAddedToResource {
            resource_id: cmd.resource_id,
            reservation_id: cmd.reservation_id,
            user_id: cmd.user_id,
            from_utc: cmd.from_utc,
            to_utc: cmd.to_utc,
            occurred_at_utc: cmd.occurred_at_utc,
        }))
    }

    fn handle_cancel_reservation(
        &self,
        cmd: &CancelReservationInResource,
    ) -> Result<ResourceEvent, DomainError> {
        if !self.created {
            return Err(DomainError::ResourceNotFound);
        }

        let reservation = self
            .reservation(cmd.reservation_id)
            .ok_or(DomainError::ReservationNotFound)?;

        if reservation.status == ReservationStatus::Cancelled {
            return Err(DomainError::ReservationAlreadyCancelled);
        }
        if !cmd.actor_role.is_admin() && reservation.user_id != cmd.actor_user_id {
            return Err(DomainError::UnauthorizedCancel);
        }

        Ok(ResourceEvent::ResourceReservationCancelled(ResourceReservationCancelled {
            resource_id: cmd.resource_id,
            reservation_id: cmd.reservation_id,
            cancelled_at_utc: cmd.occurred_at_utc,
            occurred_at_utc: cmd.occurred_at_utc,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
