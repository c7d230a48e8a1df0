use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{json, Value as JsonValue};

use reserva_core::DomainError;
use reserva_infra::event_store::EventStoreError;
use reserva_infra::runner::RunnerError;

/// API-level error with the stable wire envelope `{error: {code, reason, meta}}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub reason: String,
    pub meta: JsonValue,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, reason: impl Into<String>) -> Self {
        Self {
            status,
            code,
            reason: reason.into(),
            meta: json!({}),
        }
    }

    pub fn with_meta(mut self, meta: JsonValue) -> Self {
        self.meta = meta;
        self
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", reason)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid bearer token",
        )
    }

    pub fn bootstrap_forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "BOOTSTRAP_FORBIDDEN",
            "invalid admin bootstrap key",
        )
    }

    pub fn missing_idempotency_key() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "MISSING_IDEMPOTENCY_KEY",
            "Idempotency-Key header is required on mutating endpoints",
        )
    }

    pub fn idempotency_hash_mismatch() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "IDEMPOTENCY_HASH_MISMATCH",
            "idempotency key was already used with a different request",
        )
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", reason)
    }

    /// The `(statusCode, responseBody)` pair the idempotency layer stores.
    pub fn into_parts(self) -> (StatusCode, JsonValue) {
        let body = json!({
            "error": {
                "code": self.code,
                "reason": self.reason,
                "meta": self.meta,
            }
        });
        (self.status, body)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            code: err.code(),
            reason: err.to_string(),
            meta: json!({}),
        }
    }
}

impl From<RunnerError> for ApiError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Domain(domain) => domain.into(),
            RunnerError::VersionConflict { attempts } => Self::new(
                StatusCode::CONFLICT,
                "VERSION_CONFLICT",
                "concurrent writers exhausted the retry budget",
            )
            .with_meta(json!({"attempts": attempts})),
            RunnerError::Store(EventStoreError::StreamGapDetected { expected, actual }) => {
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STREAM_GAP_DETECTED",
                    "stream read consistency defect",
                )
                .with_meta(json!({"expected": expected, "actual": actual}))
            }
            RunnerError::Store(store) => Self::internal(store.to_string()),
            RunnerError::SnapshotCodec(reason) => Self::internal(reason),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = self.into_parts();
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_carry_their_taxonomy() {
        let err: ApiError = DomainError::ReservationOverlap.into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "RESERVATION_OVERLAP");

        let (status, body) = err.into_parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "RESERVATION_OVERLAP");
    }

    #[test]
    fn runner_errors_map_to_conflict_and_internal() {
        let err: ApiError = RunnerError::VersionConflict { attempts: 2 }.into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "VERSION_CONFLICT");
        assert_eq!(err.meta["attempts"], 2);

        let err: ApiError =
            RunnerError::Store(EventStoreError::StreamGapDetected {
                expected: 2,
                actual: 3,
            })
            .into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "STREAM_GAP_DETECTED");
        assert_eq!(err.meta["expected"], 2);
    }
}
