use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{post, put},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value as JsonValue};

use reserva_auth::Claims;
use reserva_core::{DomainError, ReservationId, ResourceId, StreamType};
use reserva_events::CommandMeta;
use reserva_resources::{
    CancelReservationInResource, CreateReservationInResource, CreateResource, Resource,
    ResourceCommand, UpdateResourceMetadata,
};

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::app::{dto, gate};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_resource))
        .route("/:id/metadata", put(update_metadata))
        .route("/:id/reservations", post(create_reservation))
        .route("/:id/reservations/:rid/cancel", post(cancel_reservation))
}

fn parse_resource_id(raw: &str) -> Result<ResourceId, ApiError> {
    raw.parse()
        .map_err(|e: DomainError| ApiError::invalid_request(e.to_string()))
}

fn parse_reservation_id(raw: &str) -> Result<ReservationId, ApiError> {
    raw.parse()
        .map_err(|e: DomainError| ApiError::invalid_request(e.to_string()))
}

async fn create_resource(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    Json(body): Json<dto::CreateResourceRequest>,
) -> Response {
    let content = match serde_json::to_value(&body) {
        Ok(value) => gate::request_content("/resources", &value, Some(claims.sub)),
        Err(e) => return ApiError::internal(e.to_string()).into_response(),
    };

    let services_ref = services.clone();
    gate::run_idempotent(&services, &headers, content, move || async move {
        // Advisory uniqueness check; the stream-level invariant is the
        // decider's job.
        let taken = services_ref
            .projections
            .get_resource_by_name(&body.name)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        if taken.is_some() {
            return Err(DomainError::ResourceNameTaken.into());
        }

        let resource_id = ResourceId::new();
        let command = ResourceCommand::CreateResource(CreateResource {
            resource_id,
            name: body.name,
            details: body.details,
            actor_role: claims.role,
            occurred_at_utc: Utc::now(),
        });

        let committed = services_ref
            .runner
            .execute::<Resource>(
                StreamType::Resource,
                *resource_id.as_uuid(),
                &command,
                CommandMeta::with_actor(command.name(), claims.sub),
            )
            .await?;

        Ok((
            StatusCode::CREATED,
            json!({
                "resourceId": resource_id,
                "version": committed.recorded.version,
            }),
        ))
    })
    .await
}

async fn update_metadata(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<dto::UpdateResourceMetadataRequest>,
) -> Response {
    let path = format!("/resources/{id}/metadata");
    let content = match serde_json::to_value(&body) {
        Ok(value) => gate::request_content(&path, &value, Some(claims.sub)),
        Err(e) => return ApiError::internal(e.to_string()).into_response(),
    };

    let services_ref = services.clone();
    gate::run_idempotent(&services, &headers, content, move || async move {
        let resource_id = parse_resource_id(&id)?;
        let command = ResourceCommand::UpdateResourceMetadata(UpdateResourceMetadata {
            resource_id,
            name: body.name,
            details: body.details,
            actor_role: claims.role,
            occurred_at_utc: Utc::now(),
        });

        let committed = services_ref
            .runner
            .execute::<Resource>(
                StreamType::Resource,
                *resource_id.as_uuid(),
                &command,
                CommandMeta::with_actor(command.name(), claims.sub),
            )
            .await?;

        Ok((
            StatusCode::OK,
            json!({
                "resourceId": resource_id,
                "version": committed.recorded.version,
            }),
        ))
    })
    .await
}

async fn create_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<dto::CreateReservationRequest>,
) -> Response {
    let path = format!("/resources/{id}/reservations");
    let content = match serde_json::to_value(&body) {
        Ok(value) => gate::request_content(&path, &value, Some(claims.sub)),
        Err(e) => return ApiError::internal(e.to_string()).into_response(),
    };

    let services_ref = services.clone();
    gate::run_idempotent(&services, &headers, content, move || async move {
        let resource_id = parse_resource_id(&id)?;

        // Advisory actor-exists check against the projection.
        let actor = services_ref
            .projections
            .get_user(claims.sub)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        if actor.is_none() {
            return Err(DomainError::UserNotFound.into());
        }

        let reservation_id = ReservationId::new();
        let now = Utc::now();
        let command = ResourceCommand::CreateReservationInResource(CreateReservationInResource {
            resource_id,
            reservation_id,
            user_id: claims.sub,
            from_utc: body.from_utc,
            to_utc: body.to_utc,
            now_utc: now,
            occurred_at_utc: now,
        });

        services_ref
            .runner
            .execute::<Resource>(
                StreamType::Resource,
                *resource_id.as_uuid(),
                &command,
                CommandMeta::with_actor(command.name(), claims.sub),
            )
            .await?;

        Ok((
            StatusCode::CREATED,
            json!({
                "reservationId": reservation_id,
                "resourceId": resource_id,
                "fromUtc": body.from_utc,
                "toUtc": body.to_utc,
                "status": "active",
            }),
        ))
    })
    .await
}

async fn cancel_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(claims): Extension<Claims>,
    Path((id, rid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/resources/{id}/reservations/{rid}/cancel");
    let content = gate::request_content(&path, &JsonValue::Null, Some(claims.sub));

    let services_ref = services.clone();
    gate::run_idempotent(&services, &headers, content, move || async move {
        let resource_id = parse_resource_id(&id)?;
        let reservation_id = parse_reservation_id(&rid)?;

        let command = ResourceCommand::CancelReservationInResource(CancelReservationInResource {
            resource_id,
            reservation_id,
            actor_user_id: claims.sub,
            actor_role: claims.role,
            occurred_at_utc: Utc::now(),
        });

        let committed = services_ref
            .runner
            .execute::<Resource>(
                StreamType::Resource,
                *resource_id.as_uuid(),
                &command,
                CommandMeta::with_actor(command.name(), claims.sub),
            )
            .await?;

        Ok((
            StatusCode::OK,
            json!({
                "reservationId": reservation_id,
                "status": "cancelled",
                "cancelledAtUtc": committed.recorded.payload["cancelledAtUtc"],
            }),
        ))
    })
    .await
}
