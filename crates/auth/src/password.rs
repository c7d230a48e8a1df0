use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Pluggable password KDF.
///
/// The stored hash is opaque to the rest of the system: deciders carry it in
/// events without interpreting it, and only this trait can produce or verify
/// one. (The hash living inside user event payloads is a preserved design
/// choice of the original system; see DESIGN.md.)
pub trait PasswordKdf: Send + Sync {
    /// Hash a clear-text password into a self-describing PHC string.
    fn hash(&self, password: &str) -> Result<String, KdfError>;

    /// Verify a clear-text password against a stored hash.
    ///
    /// Malformed stored hashes verify as `false`, never as an error: login
    /// must not leak whether the account exists or its record is damaged.
    fn verify(&self, password: &str, stored_hash: &str) -> bool;
}

/// Argon2id KDF with the crate's default parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Kdf;

impl PasswordKdf for Argon2Kdf {
    fn hash(&self, password: &str) -> Result<String, KdfError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| KdfError::Hash(e.to_string()))
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verify_roundtrip() {
        let kdf = Argon2Kdf;
        let hash = kdf.hash("Password123").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(kdf.verify("Password123", &hash));
        assert!(!kdf.verify("password123", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let kdf = Argon2Kdf;
        let a = kdf.hash("Password123").unwrap();
        let b = kdf.hash("Password123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_stored_hash_verifies_false() {
        let kdf = Argon2Kdf;
        assert!(!kdf.verify("Password123", "not-a-phc-string"));
    }
}
