use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use reserva_core::{Role, UserId};

/// Default bearer token lifetime.
pub const TOKEN_TTL: Duration = Duration::hours(8);

/// JWT claims model (transport-agnostic).
///
/// The minimal set of claims the service expects once a token has been
/// decoded and verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the authenticated user.
    pub sub: UserId,

    /// Email the token was issued for.
    pub email: String,

    /// Role granted within this token.
    pub role: Role,

    /// Issued-at timestamp.
    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    pub fn new(sub: UserId, email: impl Into<String>, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            sub,
            email: email.into(),
            role,
            issued_at: now,
            expires_at: now + TOKEN_TTL,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate JWT claims.
///
/// Note: this validates the *claims* only; signature verification happens in
/// the validator implementation.
pub fn validate_claims(claims: &Claims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// JWT validator abstraction (keeps the API decoupled from token decoding).
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenValidationError>;
}

/// HS256 token service: issuance + signature verification + claims validation.
#[derive(Clone)]
pub struct Hs256Jwt {
    secret: Vec<u8>,
}

impl Hs256Jwt {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue a signed token for the given claims.
    pub fn issue(&self, claims: &Claims) -> Result<String, TokenValidationError> {
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            claims,
            &jsonwebtoken::EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| TokenValidationError::InvalidToken(e.to_string()))
    }
}

impl JwtValidator for Hs256Jwt {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenValidationError> {
        if token.trim().is_empty() {
            return Err(TokenValidationError::MissingToken);
        }

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        // exp/iat are validated deterministically below.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        let decoded = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(|e| TokenValidationError::InvalidToken(e.to_string()))?;

        validate_claims(&decoded.claims, now)?;
        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(now: DateTime<Utc>) -> Claims {
        Claims::new(UserId::new(), "admin@test.com", Role::Admin, now)
    }

    #[test]
    fn issue_and_validate_roundtrip() {
        let jwt = Hs256Jwt::new("bootstrap-local-secret");
        let now = Utc::now();
        let claims = claims(now);

        let token = jwt.issue(&claims).unwrap();
        let validated = jwt.validate(&token, now + Duration::minutes(1)).unwrap();
        assert_eq!(validated, claims);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = Hs256Jwt::new("secret-a");
        let verifier = Hs256Jwt::new("secret-b");
        let now = Utc::now();

        let token = issuer.issue(&claims(now)).unwrap();
        let err = verifier.validate(&token, now).unwrap_err();
        assert!(matches!(err, TokenValidationError::InvalidToken(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = Hs256Jwt::new("secret");
        let now = Utc::now();

        let token = jwt.issue(&claims(now)).unwrap();
        let err = jwt.validate(&token, now + TOKEN_TTL).unwrap_err();
        assert_eq!(err, TokenValidationError::Expired);
    }

    #[test]
    fn future_issued_at_is_rejected() {
        let now = Utc::now();
        let claims = claims(now + Duration::minutes(5));
        let err = validate_claims(&claims, now).unwrap_err();
        assert_eq!(err, TokenValidationError::NotYetValid);
    }

    #[test]
    fn empty_token_is_missing() {
        let jwt = Hs256Jwt::new("secret");
        let err = jwt.validate("  ", Utc::now()).unwrap_err();
        assert_eq!(err, TokenValidationError::MissingToken);
    }
}
