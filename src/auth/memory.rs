//! Process-local user store. Used when no database is configured and in tests.

use super::{
    lockout::LockoutState,
    password::{hash_blocking, verify_blocking, Argon2Hasher, PasswordHasher},
    store::{new_security_stamp, NewUser, RefreshTokenRecord, StoreError, User, UserStore},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use uuid::Uuid;

struct Record {
    user: User,
    password_hash: String,
    recovery_codes: Vec<Vec<u8>>,
}

pub struct MemoryUserStore {
    hasher: Arc<dyn PasswordHasher>,
    records: Mutex<HashMap<Uuid, Record>>,
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new(Arc::new(Argon2Hasher::default()))
    }
}

impl MemoryUserStore {
    #[must_use]
    pub fn new(hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            hasher,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<Uuid, Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<T>(&self, id: Uuid, f: impl FnOnce(&mut Record) -> T) -> Result<T, StoreError> {
        let mut records = self.records();
        let record = records.get_mut(&id).ok_or(StoreError::UserNotFound)?;
        Ok(f(record))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let password_hash =
            hash_blocking(self.hasher.clone(), new_user.password.clone()).await?;
        let mut records = self.records();
        if records
            .values()
            .any(|record| record.user.username == new_user.username)
        {
            return Err(StoreError::Conflict);
        }
        let user = User {
            id: Uuid::now_v7(),
            username: new_user.username,
            roles: new_user.roles,
            security_stamp: new_security_stamp(),
            lockout: LockoutState::default(),
            two_factor_enabled: false,
            authenticator_key: None,
            refresh_token_hash: None,
            refresh_token_expires_at: None,
        };
        records.insert(
            user.id,
            Record {
                user: user.clone(),
                password_hash,
                recovery_codes: Vec::new(),
            },
        );
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .records()
            .values()
            .find(|record| record.user.username == username)
            .map(|record| record.user.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.records().get(&id).map(|record| record.user.clone()))
    }

    async fn find_by_refresh_token(&self, hash: &[u8]) -> Result<Option<User>, StoreError> {
        Ok(self
            .records()
            .values()
            .find(|record| record.user.refresh_token_hash.as_deref() == Some(hash))
            .map(|record| record.user.clone()))
    }

    async fn check_password(&self, id: Uuid, password: &str) -> Result<bool, StoreError> {
        let stored = self.update(id, |record| record.password_hash.clone())?;
        Ok(verify_blocking(self.hasher.clone(), password.to_string(), stored).await?)
    }

    async fn set_password(&self, id: Uuid, password: &str) -> Result<(), StoreError> {
        let password_hash = hash_blocking(self.hasher.clone(), password.to_string()).await?;
        self.update(id, |record| record.password_hash = password_hash)
    }

    async fn record_failed_access(
        &self,
        id: Uuid,
        threshold: u32,
        lockout: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, StoreError> {
        self.update(id, |record| {
            record.user.lockout = record.user.lockout.after_failure(threshold, lockout, now);
            record.user.lockout
        })
    }

    async fn reset_failed_access(&self, id: Uuid) -> Result<(), StoreError> {
        self.update(id, |record| record.user.lockout = LockoutState::default())
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: Option<&[u8]>,
        replacement: Option<RefreshTokenRecord>,
    ) -> Result<bool, StoreError> {
        self.update(id, |record| {
            if record.user.refresh_token_hash.as_deref() != expected {
                return false;
            }
            let (hash, expires_at) = replacement
                .map(|r| (Some(r.hash), Some(r.expires_at)))
                .unwrap_or_default();
            record.user.refresh_token_hash = hash;
            record.user.refresh_token_expires_at = expires_at;
            true
        })
    }

    async fn set_refresh_token(
        &self,
        id: Uuid,
        record: Option<RefreshTokenRecord>,
    ) -> Result<(), StoreError> {
        let (hash, expires_at) = record
            .map(|r| (Some(r.hash), Some(r.expires_at)))
            .unwrap_or_default();
        self.update(id, |stored| {
            stored.user.refresh_token_hash = hash;
            stored.user.refresh_token_expires_at = expires_at;
        })
    }

    async fn rotate_security_stamp(&self, id: Uuid) -> Result<String, StoreError> {
        let stamp = new_security_stamp();
        self.update(id, |record| {
            record.user.security_stamp.clone_from(&stamp);
        })?;
        Ok(stamp)
    }

    async fn set_roles(&self, id: Uuid, roles: Vec<String>) -> Result<(), StoreError> {
        self.update(id, |record| record.user.roles = roles)
    }

    async fn set_authenticator_key(
        &self,
        id: Uuid,
        key: Option<String>,
    ) -> Result<(), StoreError> {
        self.update(id, |record| record.user.authenticator_key = key)
    }

    async fn set_two_factor_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError> {
        self.update(id, |record| record.user.two_factor_enabled = enabled)
    }

    async fn replace_recovery_codes(
        &self,
        id: Uuid,
        hashes: Vec<Vec<u8>>,
    ) -> Result<(), StoreError> {
        self.update(id, |record| record.recovery_codes = hashes)
    }

    async fn count_recovery_codes(&self, id: Uuid) -> Result<usize, StoreError> {
        self.update(id, |record| record.recovery_codes.len())
    }

    async fn redeem_recovery_code(&self, id: Uuid, hash: &[u8]) -> Result<bool, StoreError> {
        self.update(id, |record| {
            let before = record.recovery_codes.len();
            record.recovery_codes.retain(|stored| stored.as_slice() != hash);
            record.recovery_codes.len() < before
        })
    }
}
