use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use reserva_core::{ReservationId, ResourceId, UserId};

use super::{
    decode_cursor, encode_cursor, Page, ProjectionLag, ProjectionStore, ProjectionStoreError,
    ReservationFilter, ReservationRow, ResourceRow, UserRow,
};

/// In-memory projection store for tests and single-process mode.
///
/// Reservations live in a `BTreeMap` keyed by UUID so pagination order is
/// deterministic and the cursor can mimic the document store's
/// exclusive-start-key shape.
#[derive(Debug, Default)]
pub struct InMemoryProjectionStore {
    users: RwLock<HashMap<UserId, UserRow>>,
    resources: RwLock<HashMap<ResourceId, ResourceRow>>,
    reservations: RwLock<BTreeMap<Uuid, ReservationRow>>,
    lag: RwLock<Option<ProjectionLag>>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(_: impl core::fmt::Debug) -> ProjectionStoreError {
    ProjectionStoreError::Other("lock poisoned".to_string())
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn put_user(&self, row: UserRow) -> Result<(), ProjectionStoreError> {
        self.users.write().map_err(poisoned)?.insert(row.user_id, row);
        Ok(())
    }

    async fn set_user_last_login(
        &self,
        user_id: UserId,
        last_login_at_utc: DateTime<Utc>,
    ) -> Result<(), ProjectionStoreError> {
        if let Some(row) = self.users.write().map_err(poisoned)?.get_mut(&user_id) {
            row.last_login_at_utc = Some(last_login_at_utc);
        }
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRow>, ProjectionStoreError> {
        Ok(self.users.read().map_err(poisoned)?.get(&user_id).cloned())
    }

    async fn get_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserRow>, ProjectionStoreError> {
        Ok(self
            .users
            .read()
            .map_err(poisoned)?
            .values()
            .find(|row| row.email == email)
            .cloned())
    }

    async fn put_resource(&self, row: ResourceRow) -> Result<(), ProjectionStoreError> {
        self.resources
            .write()
            .map_err(poisoned)?
            .insert(row.resource_id, row);
        Ok(())
    }

    async fn update_resource_details(
        &self,
        resource_id: ResourceId,
        name: String,
        details: String,
        updated_at_utc: DateTime<Utc>,
    ) -> Result<(), ProjectionStoreError> {
        if let Some(row) = self
            .resources
            .write()
            .map_err(poisoned)?
            .get_mut(&resource_id)
        {
            row.name = name;
            row.details = details;
            row.updated_at_utc = updated_at_utc;
        }
        Ok(())
    }

    async fn get_resource(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<ResourceRow>, ProjectionStoreError> {
        Ok(self
            .resources
            .read()
            .map_err(poisoned)?
            .get(&resource_id)
            .cloned())
    }

    async fn get_resource_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ResourceRow>, ProjectionStoreError> {
        Ok(self
            .resources
            .read()
            .map_err(poisoned)?
            .values()
            .find(|row| row.name == name)
            .cloned())
    }

    async fn put_reservation(&self, row: ReservationRow) -> Result<(), ProjectionStoreError> {
        self.reservations
            .write()
            .map_err(poisoned)?
            .insert(*row.reservation_id.as_uuid(), row);
        Ok(())
    }

    async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
        cancelled_at_utc: DateTime<Utc>,
    ) -> Result<(), ProjectionStoreError> {
        if let Some(row) = self
            .reservations
            .write()
            .map_err(poisoned)?
            .get_mut(reservation_id.as_uuid())
        {
            row.status = reserva_resources::ReservationStatus::Cancelled;
            row.cancelled_at_utc = Some(cancelled_at_utc);
        }
        Ok(())
    }

    async fn list_reservations(
        &self,
        filter: ReservationFilter,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<ReservationRow>, ProjectionStoreError> {
        let start_after: Option<Uuid> = match cursor {
            Some(cursor) => {
                let continuation = decode_cursor(cursor)?;
                let id = continuation
                    .get("reservationId")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ProjectionStoreError::BadCursor("missing reservationId".to_string())
                    })?;
                Some(id.parse().map_err(|e| {
                    ProjectionStoreError::BadCursor(format!("reservationId: {e}"))
                })?)
            }
            None => None,
        };

        let reservations = self.reservations.read().map_err(poisoned)?;
        let mut items = Vec::new();
        let mut next_cursor = None;

        if limit == 0 {
            return Ok(Page { items, next_cursor });
        }

        for (id, row) in reservations.iter() {
            if let Some(after) = start_after {
                if *id <= after {
                    continue;
                }
            }
            if let Some(user_id) = filter.user_id {
                if row.user_id != user_id {
                    continue;
                }
            }
            if let Some(status) = filter.status {
                if row.status != status {
                    continue;
                }
            }

            if items.len() as u32 == limit {
                if let Some(last) = items.last() {
                    next_cursor = Some(encode_cursor(&json!({
                        "reservationId": last.reservation_id.to_string()
                    }))?);
                }
                break;
            }
            items.push(row.clone());
        }

        Ok(Page { items, next_cursor })
    }

    async fn upsert_lag(&self, lag: ProjectionLag) -> Result<(), ProjectionStoreError> {
        *self.lag.write().map_err(poisoned)? = Some(lag);
        Ok(())
    }

    async fn get_lag(&self) -> Result<Option<ProjectionLag>, ProjectionStoreError> {
        Ok(self.lag.read().map_err(poisoned)?.clone())
    }
}
