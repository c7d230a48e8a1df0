//! Query-side tables and the idempotent operations that maintain them.
//!
//! The projection store owns query-side state only; it can be rebuilt
//! entirely by replaying events. All writes are idempotent (full-item puts
//! keyed by aggregate id, or attribute sets to event-derived values), so
//! at-least-once delivery re-applies cleanly.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use reserva_core::{ReservationId, ResourceId, Role, UserId};
use reserva_resources::ReservationStatus;

mod dynamo;
mod in_memory;

pub use dynamo::{DynamoProjectionStore, ProjectionTables};
pub use in_memory::InMemoryProjectionStore;

pub(crate) use dynamo::dynamo_client;

#[derive(Debug, Error)]
pub enum ProjectionStoreError {
    #[error("invalid cursor: {0}")]
    BadCursor(String),

    #[error("projection store error: {0}")]
    Other(String),
}

/// Row in `users_projection` (PK `userId`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
    pub created_at_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at_utc: Option<DateTime<Utc>>,
}

/// Row in `resources_projection` (PK `resourceId`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRow {
    pub resource_id: ResourceId,
    pub name: String,
    pub details: String,
    pub status: String,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

/// Row in `reservations_projection` (PK `reservationId`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRow {
    pub reservation_id: ReservationId,
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub from_utc: DateTime<Utc>,
    pub to_utc: DateTime<Utc>,
    pub status: ReservationStatus,
    pub created_at_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at_utc: Option<DateTime<Utc>>,
}

/// Single row in `projection_lag` (PK `projection`, always `"main"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionLag {
    pub projection: String,
    pub last_projected_at_utc: DateTime<Utc>,
    pub events_behind: u64,
}

impl ProjectionLag {
    pub const MAIN: &'static str = "main";

    pub fn main(last_projected_at_utc: DateTime<Utc>) -> Self {
        Self {
            projection: Self::MAIN.to_string(),
            last_projected_at_utc,
            events_behind: 0,
        }
    }
}

/// Filter for `list_reservations`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub user_id: Option<UserId>,
    pub status: Option<ReservationStatus>,
}

/// One page of results plus the cursor for the next page, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Encode a store continuation key as an opaque base64url cursor.
pub fn encode_cursor(continuation: &JsonValue) -> Result<String, ProjectionStoreError> {
    let bytes = serde_json::to_vec(continuation)
        .map_err(|e| ProjectionStoreError::Other(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Decode an opaque cursor back into the store continuation key.
pub fn decode_cursor(cursor: &str) -> Result<JsonValue, ProjectionStoreError> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| ProjectionStoreError::BadCursor(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ProjectionStoreError::BadCursor(e.to_string()))
}

/// Query-side document store.
///
/// Mutating operations mirror the projector's op table one-to-one and must be
/// idempotent. Read helpers serve the command builders' advisory checks.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn put_user(&self, row: UserRow) -> Result<(), ProjectionStoreError>;

    async fn set_user_last_login(
        &self,
        user_id: UserId,
        last_login_at_utc: DateTime<Utc>,
    ) -> Result<(), ProjectionStoreError>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRow>, ProjectionStoreError>;

    async fn get_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserRow>, ProjectionStoreError>;

    async fn put_resource(&self, row: ResourceRow) -> Result<(), ProjectionStoreError>;

    async fn update_resource_details(
        &self,
        resource_id: ResourceId,
        name: String,
        details: String,
        updated_at_utc: DateTime<Utc>,
    ) -> Result<(), ProjectionStoreError>;

    async fn get_resource(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<ResourceRow>, ProjectionStoreError>;

    async fn get_resource_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ResourceRow>, ProjectionStoreError>;

    async fn put_reservation(&self, row: ReservationRow) -> Result<(), ProjectionStoreError>;

    async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
        cancelled_at_utc: DateTime<Utc>,
    ) -> Result<(), ProjectionStoreError>;

    async fn list_reservations(
        &self,
        filter: ReservationFilter,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<ReservationRow>, ProjectionStoreError>;

    async fn upsert_lag(&self, lag: ProjectionLag) -> Result<(), ProjectionStoreError>;

    async fn get_lag(&self) -> Result<Option<ProjectionLag>, ProjectionStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursors_are_opaque_base64url() {
        let continuation = json!({"reservationId": "0192f3a1-0000-7000-8000-000000000000"});
        let cursor = encode_cursor(&continuation).unwrap();
        assert!(!cursor.contains('='));
        assert!(!cursor.contains('+'));
        assert_eq!(decode_cursor(&cursor).unwrap(), continuation);
    }

    #[test]
    fn garbage_cursors_are_rejected() {
        assert!(matches!(
            decode_cursor("not//valid=="),
            Err(ProjectionStoreError::BadCursor(_))
        ));
    }
}
