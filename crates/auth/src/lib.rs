//! Auth: bearer claims, HS256 tokens, password KDF.

mod claims;
mod password;

pub use claims::{
    validate_claims, Claims, Hs256Jwt, JwtValidator, TokenValidationError, TOKEN_TTL,
};
pub use password::{Argon2Kdf, KdfError, PasswordKdf};
