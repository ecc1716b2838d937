//! Password hashing for stored user records.
//!
//! New records get argon2 PHC strings. Records imported from older
//! deployments can carry bcrypt (`$2a$`/`$2b$`) hashes; those are not
//! verifiable here and come back as [`PasswordCheck::Unsupported`].

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Match,
    Mismatch,
    /// The stored value is not an argon2 hash.
    Unsupported,
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("argon2 hashing failed: {e}"))
}

pub fn check_password(plain: &str, stored: &str) -> PasswordCheck {
    let parsed = match PasswordHash::new(stored) {
        Ok(parsed) if parsed.algorithm.as_str().starts_with("argon2") => parsed,
        _ => return PasswordCheck::Unsupported,
    };
    match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => PasswordCheck::Match,
        Err(_) => PasswordCheck::Mismatch,
    }
}
