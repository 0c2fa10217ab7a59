//! Credential verification with two strategies selected by the shape of the
//! stored hash: a legacy unsalted SHA-256 hex digest, or a modern argon2
//! hash. Legacy hashes are upgraded on the next successful login.

use anyhow::Result;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    /// 64 hex characters, no salt. Pre-migration accounts only.
    LegacySha256,
    Argon2,
}

pub fn detect_scheme(stored: &str) -> HashScheme {
    if stored.len() == 64 && stored.chars().all(|c| c.is_ascii_hexdigit()) {
        HashScheme::LegacySha256
    } else {
        HashScheme::Argon2
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match detect_scheme(stored) {
        HashScheme::LegacySha256 => {
            let digest = Sha256::digest(password.as_bytes());
            let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
            hex.eq_ignore_ascii_case(stored)
        }
        HashScheme::Argon2 => match PasswordHash::new(stored) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        },
    }
}

/// True when the stored hash should be transparently re-hashed after a
/// successful verification.
pub fn needs_rehash(stored: &str) -> bool {
    detect_scheme(stored) == HashScheme::LegacySha256
}
