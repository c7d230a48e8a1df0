//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant maps to a stable wire code and an HTTP status. Keep this
/// focused on deterministic business failures; infrastructure concerns
/// (version conflicts, gaps, transport) live in their own error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A request value failed validation before reaching a decider.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The user stream already holds a created user.
    #[error("user already exists")]
    UserAlreadyExists,

    /// Login failed (unknown email, wrong password, or missing user).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Actor role does not permit this command.
    #[error("forbidden")]
    Forbidden,

    /// The resource stream already holds a created resource.
    #[error("resource already exists")]
    ResourceAlreadyExists,

    /// Another resource already uses this name.
    #[error("resource name is already taken")]
    ResourceNameTaken,

    /// The resource aggregate does not exist.
    #[error("resource not found")]
    ResourceNotFound,

    /// The actor's user record does not exist.
    #[error("user not found")]
    UserNotFound,

    /// `fromUtc` is not strictly before `toUtc`.
    #[error("invalid interval: fromUtc must be before toUtc")]
    InvalidInterval,

    /// The reservation would start in the past.
    #[error("reservation starts in the past")]
    ReservationInPast,

    /// Half-open interval intersection with an active reservation.
    #[error("reservation overlaps an active reservation")]
    ReservationOverlap,

    /// No reservation with the given id exists on this resource.
    #[error("reservation not found")]
    ReservationNotFound,

    /// The reservation is already cancelled.
    #[error("reservation already cancelled")]
    ReservationAlreadyCancelled,

    /// Only the reservation owner or an admin may cancel.
    #[error("actor may not cancel this reservation")]
    UnauthorizedCancel,
}

impl DomainError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::UserAlreadyExists => "USER_ALREADY_EXISTS",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Forbidden => "FORBIDDEN",
            Self::ResourceAlreadyExists => "RESOURCE_ALREADY_EXISTS",
            Self::ResourceNameTaken => "RESOURCE_NAME_TAKEN",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::InvalidInterval => "INVALID_INTERVAL",
            Self::ReservationInPast => "RESERVATION_IN_PAST",
            Self::ReservationOverlap => "RESERVATION_OVERLAP",
            Self::ReservationNotFound => "RESERVATION_NOT_FOUND",
            Self::ReservationAlreadyCancelled => "RESERVATION_ALREADY_CANCELLED",
            Self::UnauthorizedCancel => "UNAUTHORIZED_CANCEL",
        }
    }

    /// HTTP status this error maps to at the transport boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidInterval
            | Self::ReservationInPast => 400,
            Self::InvalidCredentials => 401,
            Self::Forbidden | Self::UnauthorizedCancel => 403,
            Self::ResourceNotFound | Self::ReservationNotFound | Self::UserNotFound => 404,
            Self::UserAlreadyExists
            | Self::ResourceAlreadyExists
            | Self::ResourceNameTaken
            | Self::ReservationOverlap
            | Self::ReservationAlreadyCancelled => 409,
        }
    }
}
