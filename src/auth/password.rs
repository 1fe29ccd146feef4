//! Password hashing owned by the user stores.
//!
//! Hashes are PHC strings so the parameters travel with each hash and can be
//! tightened later without invalidating existing credentials.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("failed to hash password")]
    Hash,
    #[error("stored password hash is invalid")]
    InvalidHash,
    #[error("password hashing task failed")]
    Task,
}

pub trait PasswordHasher: Send + Sync {
    /// # Errors
    /// Returns an error if hashing fails.
    fn hash(&self, password: &str) -> Result<String, PasswordError>;

    /// `Ok(false)` for a wrong password, `Err` only when the stored hash is unusable.
    ///
    /// # Errors
    /// Returns an error if `stored_hash` cannot be parsed.
    fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, PasswordError>;
}

/// Run [`PasswordHasher::hash`] on the blocking pool.
///
/// # Errors
/// Returns the hasher's error, or `Task` if the worker panicked.
pub async fn hash_blocking(
    hasher: Arc<dyn PasswordHasher>,
    password: String,
) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|_| PasswordError::Task)?
}

/// Run [`PasswordHasher::verify`] on the blocking pool.
///
/// # Errors
/// Returns the hasher's error, or `Task` if the worker panicked.
pub async fn verify_blocking(
    hasher: Arc<dyn PasswordHasher>,
    password: String,
    stored_hash: String,
) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || hasher.verify(&password, &stored_hash))
        .await
        .map_err(|_| PasswordError::Task)?
}

/// Argon2id hasher.
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Argon2Hasher {
    #[must_use]
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Minimal cost parameters for tests.
    #[must_use]
    pub fn insecure_fast() -> Self {
        let params = Params::new(Params::MIN_M_COST, 1, 1, None).unwrap_or_default();
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| PasswordError::Hash)
    }

    fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(stored_hash).map_err(|_| PasswordError::InvalidHash)?;
        Ok(self
            .argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}
