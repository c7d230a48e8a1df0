//! Resource aggregate: metadata and reservation lifecycle (event-sourced).

mod resource;

pub use resource::{
    CancelReservationInResource, CreateReservationInResource, CreateResource, Reservation,
    ReservationAddedToResource, ReservationStatus, Resource, ResourceCommand, ResourceCreated,
    ResourceEvent, ResourceMetadataUpdated, ResourceReservationCancelled, ResourceStatus,
    UpdateResourceMetadata,
};
