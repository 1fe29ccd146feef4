//! Persistent user capability consumed by the authentication service.
//!
//! Every mutation of per-user counters and of the refresh token is a single
//! atomic operation on the backend, so concurrent requests for the same user
//! cannot interleave a read-modify-write.

use super::{lockout::LockoutState, password::PasswordError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already taken")]
    Conflict,
    #[error("user not found")]
    UserNotFound,
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Snapshot of a user record. The password hash never leaves the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub roles: Vec<String>,
    pub security_stamp: String,
    pub lockout: LockoutState,
    pub two_factor_enabled: bool,
    pub authenticator_key: Option<String>,
    pub refresh_token_hash: Option<Vec<u8>>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub roles: Vec<String>,
}

/// Stored form of the single live refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    #[must_use]
    pub fn new(raw_token: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            hash: hash_refresh_token(raw_token),
            expires_at,
        }
    }
}

/// Refresh tokens are looked up by digest so raw values never reach storage.
#[must_use]
pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Fresh opaque security stamp.
#[must_use]
pub fn new_security_stamp() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// # Errors
    /// `StoreError::Conflict` if the username exists.
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_refresh_token(&self, hash: &[u8]) -> Result<Option<User>, StoreError>;

    /// Verify a password against the stored hash.
    async fn check_password(&self, id: Uuid, password: &str) -> Result<bool, StoreError>;

    async fn set_password(&self, id: Uuid, password: &str) -> Result<(), StoreError>;

    /// Count one failed attempt and open a lockout window at `threshold`.
    async fn record_failed_access(
        &self,
        id: Uuid,
        threshold: u32,
        lockout: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, StoreError>;

    async fn reset_failed_access(&self, id: Uuid) -> Result<(), StoreError>;

    /// Compare-and-swap the refresh token. Writes `replacement` only when the
    /// stored hash equals `expected` and reports whether the swap happened.
    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: Option<&[u8]>,
        replacement: Option<RefreshTokenRecord>,
    ) -> Result<bool, StoreError>;

    /// Unconditionally replace (or drop, with `None`) the refresh token.
    async fn set_refresh_token(
        &self,
        id: Uuid,
        record: Option<RefreshTokenRecord>,
    ) -> Result<(), StoreError>;

    async fn rotate_security_stamp(&self, id: Uuid) -> Result<String, StoreError>;

    /// Replace the user's role list.
    async fn set_roles(&self, id: Uuid, roles: Vec<String>) -> Result<(), StoreError>;

    async fn set_authenticator_key(&self, id: Uuid, key: Option<String>)
        -> Result<(), StoreError>;

    async fn set_two_factor_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError>;

    async fn replace_recovery_codes(
        &self,
        id: Uuid,
        hashes: Vec<Vec<u8>>,
    ) -> Result<(), StoreError>;

    async fn count_recovery_codes(&self, id: Uuid) -> Result<usize, StoreError>;

    /// Consume a recovery code. `false` if it is unknown or already used.
    async fn redeem_recovery_code(&self, id: Uuid, hash: &[u8]) -> Result<bool, StoreError>;
}
