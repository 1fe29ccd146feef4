//! Postgres-backed user store (`sql/schema.sql`).
//!
//! Counters and the refresh token are updated with single conditional
//! statements, so the row itself is the synchronization point between
//! server instances.

use super::{
    lockout::{lockout_end_after, LockoutState},
    password::{hash_blocking, verify_blocking, PasswordHasher},
    store::{new_security_stamp, NewUser, RefreshTokenRecord, StoreError, User, UserStore},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{postgres::PgRow, FromRow, PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

pub const SCHEMA: &str = include_str!("../../sql/schema.sql");

const USER_COLUMNS: &str = "id, username, roles, security_stamp, failed_access_count, \
    lockout_end, two_factor_enabled, authenticator_key, refresh_token_hash, \
    refresh_token_expires_at";

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let failed_count: i32 = row.try_get("failed_access_count")?;
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            roles: row.try_get("roles")?,
            security_stamp: row.try_get("security_stamp")?,
            lockout: LockoutState {
                failed_count: u32::try_from(failed_count).unwrap_or_default(),
                lockout_end: row.try_get("lockout_end")?,
            },
            two_factor_enabled: row.try_get("two_factor_enabled")?,
            authenticator_key: row.try_get("authenticator_key")?,
            refresh_token_hash: row.try_get("refresh_token_hash")?,
            refresh_token_expires_at: row.try_get("refresh_token_expires_at")?,
        })
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
    hasher: Arc<dyn PasswordHasher>,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { pool, hasher }
    }

    /// Create the tables if they do not exist yet.
    ///
    /// # Errors
    /// Returns an error if the schema statements fail.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn select_user(clause: &str) -> String {
    format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}")
}

fn affected_one(rows: u64) -> Result<(), StoreError> {
    if rows == 0 {
        Err(StoreError::UserNotFound)
    } else {
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let password_hash =
            hash_blocking(self.hasher.clone(), new_user.password.clone()).await?;
        let sql = format!(
            "INSERT INTO users (id, username, password_hash, roles, security_stamp) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::now_v7())
            .bind(&new_user.username)
            .bind(password_hash)
            .bind(&new_user.roles)
            .bind(new_security_stamp())
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Conflict
                } else {
                    StoreError::Database(err)
                }
            })
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(sqlx::query_as::<_, User>(&select_user("username = $1"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(sqlx::query_as::<_, User>(&select_user("id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_refresh_token(&self, hash: &[u8]) -> Result<Option<User>, StoreError> {
        Ok(sqlx::query_as::<_, User>(&select_user("refresh_token_hash = $1"))
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn check_password(&self, id: Uuid, password: &str) -> Result<bool, StoreError> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        let stored = stored.ok_or(StoreError::UserNotFound)?;
        Ok(verify_blocking(self.hasher.clone(), password.to_string(), stored).await?)
    }

    async fn set_password(&self, id: Uuid, password: &str) -> Result<(), StoreError> {
        let password_hash = hash_blocking(self.hasher.clone(), password.to_string()).await?;
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        affected_one(result.rows_affected())
    }

    async fn record_failed_access(
        &self,
        id: Uuid,
        threshold: u32,
        lockout: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, StoreError> {
        // SET expressions see the pre-update row.
        let row = sqlx::query(
            r"
            UPDATE users SET
                failed_access_count = CASE
                    WHEN $2 > 0 AND failed_access_count + 1 >= $2 THEN 0
                    ELSE failed_access_count + 1
                END,
                lockout_end = CASE
                    WHEN $2 > 0 AND failed_access_count + 1 >= $2 THEN $3
                    ELSE lockout_end
                END
            WHERE id = $1
            RETURNING failed_access_count, lockout_end
            ",
        )
        .bind(id)
        .bind(i64::from(threshold))
        .bind(lockout_end_after(lockout, now))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::UserNotFound)?;

        let failed_count: i32 = row.try_get("failed_access_count")?;
        Ok(LockoutState {
            failed_count: u32::try_from(failed_count).unwrap_or_default(),
            lockout_end: row.try_get("lockout_end")?,
        })
    }

    async fn reset_failed_access(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET failed_access_count = 0, lockout_end = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        affected_one(result.rows_affected())
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: Option<&[u8]>,
        replacement: Option<RefreshTokenRecord>,
    ) -> Result<bool, StoreError> {
        let (hash, expires_at) = replacement
            .map(|r| (Some(r.hash), Some(r.expires_at)))
            .unwrap_or_default();
        let result = sqlx::query(
            r"
            UPDATE users
            SET refresh_token_hash = $3, refresh_token_expires_at = $4
            WHERE id = $1 AND refresh_token_hash IS NOT DISTINCT FROM $2
            ",
        )
        .bind(id)
        .bind(expected)
        .bind(hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_refresh_token(
        &self,
        id: Uuid,
        record: Option<RefreshTokenRecord>,
    ) -> Result<(), StoreError> {
        let (hash, expires_at) = record
            .map(|r| (Some(r.hash), Some(r.expires_at)))
            .unwrap_or_default();
        let result = sqlx::query(
            "UPDATE users SET refresh_token_hash = $2, refresh_token_expires_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        affected_one(result.rows_affected())
    }

    async fn rotate_security_stamp(&self, id: Uuid) -> Result<String, StoreError> {
        let stamp = new_security_stamp();
        let result = sqlx::query("UPDATE users SET security_stamp = $2 WHERE id = $1")
            .bind(id)
            .bind(&stamp)
            .execute(&self.pool)
            .await?;
        affected_one(result.rows_affected())?;
        Ok(stamp)
    }

    async fn set_roles(&self, id: Uuid, roles: Vec<String>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET roles = $2 WHERE id = $1")
            .bind(id)
            .bind(roles)
            .execute(&self.pool)
            .await?;
        affected_one(result.rows_affected())
    }

    async fn set_authenticator_key(
        &self,
        id: Uuid,
        key: Option<String>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET authenticator_key = $2 WHERE id = $1")
            .bind(id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        affected_one(result.rows_affected())
    }

    async fn set_two_factor_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET two_factor_enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        affected_one(result.rows_affected())
    }

    async fn replace_recovery_codes(
        &self,
        id: Uuid,
        hashes: Vec<Vec<u8>>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM recovery_codes WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if !hashes.is_empty() {
            sqlx::query(
                "INSERT INTO recovery_codes (user_id, code_hash) SELECT $1, UNNEST($2::bytea[])",
            )
            .bind(id)
            .bind(hashes)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count_recovery_codes(&self, id: Uuid) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recovery_codes WHERE user_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn redeem_recovery_code(&self, id: Uuid, hash: &[u8]) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM recovery_codes WHERE user_id = $1 AND code_hash = $2")
                .bind(id)
                .bind(hash)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}
