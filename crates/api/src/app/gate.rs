//! The idempotency gate around every mutating command.
//!
//! 1. Require the `Idempotency-Key` header.
//! 2. `decide(load(key), content)` where content is `{path, body, actor?}`.
//! 3. Replay returns the stored `(statusCode, responseBody)` verbatim, with
//!    no side effects.
//! 4. A key reused with different content is a conflict.
//! 5. Otherwise run the command and best-effort save the response; a save
//!    failure (including losing a concurrent-duplicate race) never fails the
//!    response, because the event append itself is version-guarded.

use std::future::Future;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use reserva_core::UserId;
use reserva_infra::idempotency::{
    decide, IdempotencyDecision, IdempotencyRecord, IdempotencyStoreError,
};

use super::errors::ApiError;
use super::services::AppServices;

/// Build the hashed request content: `{path, body, actor?}`.
pub fn request_content(path: &str, body: &JsonValue, actor: Option<UserId>) -> JsonValue {
    match actor {
        Some(actor) => json!({"path": path, "body": body, "actor": actor}),
        None => json!({"path": path, "body": body}),
    }
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("idempotency-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// Run a mutating command under the idempotency gate.
pub async fn run_idempotent<F, Fut>(
    services: &AppServices,
    headers: &HeaderMap,
    content: JsonValue,
    run: F,
) -> Response
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(StatusCode, JsonValue), ApiError>>,
{
    let Some(key) = idempotency_key(headers) else {
        return ApiError::missing_idempotency_key().into_response();
    };

    let existing = match services.idempotency.load(&key).await {
        Ok(existing) => existing,
        Err(err) => {
            return ApiError::internal(format!("idempotency lookup failed: {err}"))
                .into_response();
        }
    };

    match decide(existing, &content) {
        IdempotencyDecision::Replay(record) => {
            let status = StatusCode::from_u16(record.status_code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, axum::Json(record.response_body)).into_response()
        }
        IdempotencyDecision::Mismatch => ApiError::idempotency_hash_mismatch().into_response(),
        IdempotencyDecision::New { content_hash } => {
            let (status, body) = match run().await {
                Ok(success) => success,
                Err(err) => err.into_parts(),
            };

            // 5xx responses are transient and must stay retryable, so only
            // settled outcomes are remembered.
            if status.as_u16() < 500 {
                let record = IdempotencyRecord {
                    idempotency_key: key,
                    content_hash,
                    status_code: status.as_u16(),
                    response_body: body.clone(),
                    created_at_utc: Utc::now(),
                };
                match services.idempotency.save(record).await {
                    Ok(()) => {}
                    // A concurrent duplicate won the save race; its record
                    // stands and the effect is already guarded by version.
                    Err(IdempotencyStoreError::AlreadyExists) => {}
                    Err(err) => {
                        warn!(error = %err, "idempotency save failed");
                    }
                }
            }

            (status, axum::Json(body)).into_response()
        }
    }
}
