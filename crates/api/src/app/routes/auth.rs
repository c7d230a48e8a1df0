use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::Value as JsonValue;

use reserva_auth::Claims;
use reserva_core::{DomainError, Role, StreamType, UserId};
use reserva_events::CommandMeta;
use reserva_users::{BootstrapAdmin, LoginUser, RegisterUser, User, UserCommand};

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::app::{dto, gate};

pub fn router() -> Router {
    Router::new()
        .route("/bootstrap", post(bootstrap))
        .route("/register", post(register))
        .route("/login", post(login))
}

fn normalize_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::invalid_request("invalid email format"));
    }
    Ok(email)
}

fn token_response(
    services: &AppServices,
    user_id: UserId,
    email: String,
    role: Role,
) -> Result<JsonValue, ApiError> {
    let claims = Claims::new(user_id, email.clone(), role, Utc::now());
    let token = services
        .jwt
        .issue(&claims)
        .map_err(|e| ApiError::internal(format!("token issuance failed: {e}")))?;

    serde_json::to_value(dto::TokenResponse {
        token,
        user_id,
        email,
        role,
    })
    .map_err(|e| ApiError::internal(e.to_string()))
}

/// Shared builder for bootstrap and registration: advisory email-uniqueness
/// check against the projection, KDF hash, then the decider has the final
/// word on the empty-stream invariant.
async fn create_user(
    services: &AppServices,
    email: String,
    password: String,
    role: Role,
) -> Result<(StatusCode, JsonValue), ApiError> {
    let email = normalize_email(&email)?;

    let existing = services
        .projections
        .get_user_by_email(&email)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if existing.is_some() {
        return Err(DomainError::UserAlreadyExists.into());
    }

    let password_hash = services
        .kdf
        .hash(&password)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let user_id = UserId::new();
    let command = match role {
        Role::Admin => UserCommand::BootstrapAdmin(BootstrapAdmin {
            user_id,
            email: email.clone(),
            password_hash,
            occurred_at_utc: Utc::now(),
        }),
        Role::User => UserCommand::RegisterUser(RegisterUser {
            user_id,
            email: email.clone(),
            password_hash,
            role: Role::User,
            occurred_at_utc: Utc::now(),
        }),
    };

    services
        .runner
        .execute::<User>(
            StreamType::User,
            *user_id.as_uuid(),
            &command,
            CommandMeta::with_actor(command.name(), user_id),
        )
        .await?;

    let body = token_response(services, user_id, email, role)?;
    Ok((StatusCode::CREATED, body))
}

async fn bootstrap(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<dto::BootstrapRequest>,
) -> Response {
    let content = match serde_json::to_value(&body) {
        Ok(value) => gate::request_content("/auth/bootstrap", &value, None),
        Err(e) => return ApiError::internal(e.to_string()).into_response(),
    };

    let provided_key = headers
        .get("x-admin-bootstrap-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let services_ref = services.clone();
    gate::run_idempotent(&services, &headers, content, move || async move {
        if provided_key.as_deref() != Some(services_ref.admin_bootstrap_key.as_str()) {
            return Err(ApiError::bootstrap_forbidden());
        }
        create_user(&services_ref, body.email, body.password, Role::Admin).await
    })
    .await
}

async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<dto::RegisterRequest>,
) -> Response {
    let content = match serde_json::to_value(&body) {
        Ok(value) => gate::request_content("/auth/register", &value, None),
        Err(e) => return ApiError::internal(e.to_string()).into_response(),
    };

    let services_ref = services.clone();
    gate::run_idempotent(&services, &headers, content, move || async move {
        create_user(&services_ref, body.email, body.password, Role::User).await
    })
    .await
}

/// Login builder: resolve the user through the projection, verify the
/// password against the rehydrated stream state, then record the login.
/// Unknown email, missing stream, and wrong password are indistinguishable
/// to the caller.
async fn login_user(
    services: &AppServices,
    email: String,
    password: String,
) -> Result<(StatusCode, JsonValue), ApiError> {
    let email = normalize_email(&email)?;

    let row = services
        .projections
        .get_user_by_email(&email)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or(DomainError::InvalidCredentials)?;

    let (state, _) = services
        .runner
        .rehydrate::<User>(StreamType::User, *row.user_id.as_uuid())
        .await?;
    if !state.created || !services.kdf.verify(&password, &state.password_hash) {
        return Err(DomainError::InvalidCredentials.into());
    }

    let command = UserCommand::LoginUser(LoginUser {
        email: email.clone(),
        occurred_at_utc: Utc::now(),
    });
    services
        .runner
        .execute::<User>(
            StreamType::User,
            *row.user_id.as_uuid(),
            &command,
            CommandMeta::with_actor(command.name(), row.user_id),
        )
        .await?;

    let body = token_response(services, state.user_id, email, state.role)?;
    Ok((StatusCode::OK, body))
}

async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<dto::LoginRequest>,
) -> Response {
    let content = match serde_json::to_value(&body) {
        Ok(value) => gate::request_content("/auth/login", &value, None),
        Err(e) => return ApiError::internal(e.to_string()).into_response(),
    };

    let services_ref = services.clone();
    gate::run_idempotent(&services, &headers, content, move || async move {
        login_user(&services_ref, body.email, body.password).await
    })
    .await
}
