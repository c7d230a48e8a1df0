use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use reserva_auth::{Hs256Jwt, JwtValidator};

use crate::app::errors::ApiError;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<Hs256Jwt>,
}

/// Require a valid bearer token and expose its [`Claims`] to handlers.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer(req.headers()) else {
        return ApiError::unauthorized().into_response();
    };

    match state.jwt.validate(token, Utc::now()) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(_) => ApiError::unauthorized().into_response(),
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
