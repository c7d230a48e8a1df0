//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (event store, queue, projections,
//!   idempotency, runner)
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: the `{error: {code, reason, meta}}` envelope
//! - `gate.rs`: the idempotency gate around every mutating command

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod gate;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        jwt: services.jwt.clone(),
    };

    // Resource routes require a bearer token; auth routes are public (the
    // bootstrap route is guarded by the x-admin-bootstrap-key header).
    let protected = routes::resources::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::health))
        .nest("/auth", routes::auth::router())
        .nest("/resources", protected)
        .layer(Extension(services))
}
