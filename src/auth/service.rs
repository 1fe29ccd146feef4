//! Login, refresh, logout, password change and two-factor management.
//!
//! Flow Overview:
//! 1) Login: look the user up, refuse while locked out (before any password
//!    check), verify the password, then ask for a second factor if enabled.
//! 2) Success resets the failure counter and stores the new refresh token.
//! 3) Refresh: find the user by refresh-token digest, reject expired tokens
//!    (and forget them), then rotate with a compare-and-swap so concurrent
//!    refreshes of the same token have exactly one winner.

use super::{
    config::AuthConfig,
    outcome::{AccountError, AuthError, AuthOutcome, Principal, TwoFactorStatus},
    recovery::{hash_recovery_code, RecoveryCodeBatch},
    store::{hash_refresh_token, NewUser, RefreshTokenRecord, StoreError, User, UserStore},
    totp::{TotpProvider, TotpSetup},
    validation::{
        check_password_policy, check_two_factor_code, check_username, normalize_code, FieldErrors,
    },
};
use crate::token::{
    AccessSubject, Clock, RotationPolicy, SystemClock, TokenCodec, TokenIssuer, TokenPair,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub struct AuthenticationService {
    store: Arc<dyn UserStore>,
    issuer: TokenIssuer,
    totp: Arc<dyn TotpProvider>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl AuthenticationService {
    #[must_use]
    pub fn new(
        store: Arc<dyn UserStore>,
        issuer: TokenIssuer,
        totp: Arc<dyn TotpProvider>,
        config: AuthConfig,
    ) -> Self {
        Self {
            store,
            issuer,
            totp,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        self.issuer.codec()
    }

    fn subject(user: &User) -> AccessSubject<'_> {
        AccessSubject {
            id: user.id,
            display_name: &user.username,
            roles: &user.roles,
            security_stamp: &user.security_stamp,
        }
    }

    /// Evaluate one credential presentation.
    ///
    /// # Errors
    /// Only storage, signing or randomness failures; every rejection is an [`AuthOutcome`].
    #[instrument(skip(self, password, two_factor_code))]
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        two_factor_code: Option<&str>,
    ) -> Result<AuthOutcome, AuthError> {
        let now = self.clock.now();

        let Some(user) = self.store.find_by_username(username).await? else {
            debug!("Login for unknown user");
            return Ok(AuthOutcome::NotFound);
        };

        if user.lockout.is_locked(now) {
            let minutes_left = user.lockout.minutes_left(now);
            debug!(user_id = %user.id, minutes_left, "Login refused during lockout");
            return Ok(AuthOutcome::Locked { minutes_left });
        }

        if !self.store.check_password(user.id, password).await? {
            self.record_failure(&user, now).await?;
            return Ok(AuthOutcome::InvalidCredentials);
        }

        if user.two_factor_enabled {
            let Some(code) = two_factor_code.map(str::trim).filter(|c| !c.is_empty()) else {
                debug!(user_id = %user.id, "Second factor required");
                return Ok(AuthOutcome::TwoFactorRequired);
            };
            if !self.verify_second_factor(&user, code, now).await? {
                self.record_failure(&user, now).await?;
                return Ok(AuthOutcome::TwoFactorInvalid);
            }
        }

        self.store.reset_failed_access(user.id).await?;
        let pair = self.start_session(&user, now).await?;
        info!(user_id = %user.id, "User logged in");
        Ok(AuthOutcome::Tokens(pair))
    }

    async fn record_failure(&self, user: &User, now: DateTime<Utc>) -> Result<(), StoreError> {
        let state = self
            .store
            .record_failed_access(
                user.id,
                self.config.lockout_threshold(),
                self.config.lockout_duration(),
                now,
            )
            .await?;
        if state.is_locked(now) {
            warn!(user_id = %user.id, "Account locked after repeated failures");
        } else {
            debug!(user_id = %user.id, failed_count = state.failed_count, "Failed login");
        }
        Ok(())
    }

    /// TOTP first, then a single-use recovery code.
    async fn verify_second_factor(
        &self,
        user: &User,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        if let Some(key) = user.authenticator_key.as_deref() {
            if self.totp.verify(key, &normalize_code(code), now)? {
                return Ok(true);
            }
        }
        let Some(hash) = hash_recovery_code(code) else {
            return Ok(false);
        };
        let redeemed = self.store.redeem_recovery_code(user.id, &hash).await?;
        if redeemed {
            info!(user_id = %user.id, "Recovery code redeemed at login");
        }
        Ok(redeemed)
    }

    /// Issue a token pair and make its refresh token the only live one.
    async fn start_session(&self, user: &User, now: DateTime<Utc>) -> Result<TokenPair, AuthError> {
        let pair = self.issuer.issue_token_pair(Self::subject(user), now)?;
        let record = RefreshTokenRecord::new(&pair.refresh_token, self.issuer.refresh_token_expiry(now)?);
        self.store.set_refresh_token(user.id, Some(record)).await?;
        Ok(pair)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// # Errors
    /// Only storage, signing or randomness failures.
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<AuthOutcome, AuthError> {
        let now = self.clock.now();
        if refresh_token.trim().is_empty() {
            return Ok(AuthOutcome::Unauthorized);
        }

        let hash = hash_refresh_token(refresh_token);
        let Some(user) = self.store.find_by_refresh_token(&hash).await? else {
            debug!("Unknown refresh token");
            return Ok(AuthOutcome::Unauthorized);
        };

        let expired = user
            .refresh_token_expires_at
            .map_or(true, |expiry| expiry <= now);
        if expired {
            // Forget it so a reloaded record cannot match it again.
            self.store.swap_refresh_token(user.id, Some(&hash), None).await?;
            debug!(user_id = %user.id, "Expired refresh token cleared");
            return Ok(AuthOutcome::Unauthorized);
        }

        let access_token = self.issuer.issue_access_token(Self::subject(&user), now)?;
        let refresh_token = match self.issuer.config().rotation() {
            RotationPolicy::Reuse => refresh_token.to_string(),
            RotationPolicy::Rotate => {
                let rotated = self.issuer.issue_refresh_token()?;
                let record = RefreshTokenRecord::new(&rotated, self.issuer.refresh_token_expiry(now)?);
                if !self
                    .store
                    .swap_refresh_token(user.id, Some(&hash), Some(record))
                    .await?
                {
                    debug!(user_id = %user.id, "Lost refresh rotation race");
                    return Ok(AuthOutcome::Unauthorized);
                }
                rotated
            }
        };

        Ok(AuthOutcome::Tokens(TokenPair {
            access_token,
            refresh_token,
        }))
    }

    /// Drop the refresh token and rotate the security stamp, which also
    /// revokes every access token already issued. Idempotent.
    ///
    /// # Errors
    /// Only storage failures.
    #[instrument(skip_all, fields(user_id = %principal.user_id))]
    pub async fn logout(&self, principal: &Principal) -> Result<(), AuthError> {
        if self.store.find_by_id(principal.user_id).await?.is_none() {
            return Ok(());
        }
        self.store.set_refresh_token(principal.user_id, None).await?;
        self.store.rotate_security_stamp(principal.user_id).await?;
        info!("User logged out");
        Ok(())
    }

    /// Resolve a bearer token to the acting user.
    ///
    /// `None` for anything that does not verify, is expired, names an unknown
    /// user or carries a stale security stamp.
    ///
    /// # Errors
    /// Only storage failures.
    pub async fn authenticate(&self, bearer: &str) -> Result<Option<Principal>, AuthError> {
        let Ok(claims) = self.codec().decode(bearer) else {
            return Ok(None);
        };
        if claims.is_expired_at(self.clock.now().timestamp()) {
            return Ok(None);
        }
        let Ok(user_id) = Uuid::parse_str(&claims.subject) else {
            return Ok(None);
        };
        let Some(user) = self.store.find_by_id(user_id).await? else {
            return Ok(None);
        };
        if claims.security_stamp.as_deref() != Some(user.security_stamp.as_str()) {
            debug!(user_id = %user.id, "Access token security stamp is stale");
            return Ok(None);
        }
        Ok(Some(Principal {
            user_id: user.id,
            username: user.username,
            roles: user.roles,
        }))
    }

    /// # Errors
    /// `Validation` for policy violations or a taken username.
    #[instrument(skip(self, password, confirm_password))]
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<Uuid, AccountError> {
        let mut errors = FieldErrors::new();
        check_username(&mut errors, "username", username);
        check_password_policy(&mut errors, "password", password);
        if password != confirm_password {
            errors.add("confirmPassword", "Passwords do not match");
        }
        errors.into_result()?;

        let created = self
            .store
            .create_user(NewUser {
                username: username.trim().to_string(),
                password: password.to_string(),
                roles: vec![self.config.default_role().to_string()],
            })
            .await;

        match created {
            Ok(user) => {
                info!(user_id = %user.id, "User registered");
                Ok(user.id)
            }
            Err(StoreError::Conflict) => Err(AccountError::Validation(FieldErrors::single(
                "username",
                "Username is already taken",
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Outstanding tokens stay valid; callers wanting a revocation log out.
    ///
    /// # Errors
    /// `Validation` for policy violations or a wrong current password.
    #[instrument(skip_all, fields(user_id = %principal.user_id))]
    pub async fn change_password(
        &self,
        principal: &Principal,
        current_password: &str,
        new_password: &str,
        confirm_new_password: &str,
    ) -> Result<(), AccountError> {
        let mut errors = FieldErrors::new();
        if current_password.is_empty() {
            errors.add("currentPassword", "Current password is required");
        }
        check_password_policy(&mut errors, "newPassword", new_password);
        if !new_password.is_empty() && new_password == current_password {
            errors.add("newPassword", "New password must differ from the current one");
        }
        if confirm_new_password != new_password {
            errors.add("confirmNewPassword", "Passwords do not match");
        }
        errors.into_result()?;

        let user = self.require_user(principal).await?;
        if !self.store.check_password(user.id, current_password).await? {
            return Err(AccountError::Validation(FieldErrors::single(
                "currentPassword",
                "Incorrect password",
            )));
        }
        self.store.set_password(user.id, new_password).await?;
        info!("Password changed");
        Ok(())
    }

    async fn require_user(&self, principal: &Principal) -> Result<User, AccountError> {
        self.store
            .find_by_id(principal.user_id)
            .await?
            .ok_or(AccountError::Unauthorized)
    }

    /// # Errors
    /// `Unauthorized` if the principal no longer exists.
    pub async fn two_factor_status(
        &self,
        principal: &Principal,
    ) -> Result<TwoFactorStatus, AccountError> {
        let user = self.require_user(principal).await?;
        let recovery_codes_left = if user.two_factor_enabled {
            self.store.count_recovery_codes(user.id).await?
        } else {
            0
        };
        Ok(TwoFactorStatus {
            enabled: user.two_factor_enabled,
            recovery_codes_left,
        })
    }

    /// Hand out the pending shared secret, creating one if needed. Two-factor
    /// stays disabled until [`Self::enable_two_factor`] confirms a code.
    ///
    /// # Errors
    /// `Rejected` when two-factor is already enabled.
    #[instrument(skip_all, fields(user_id = %principal.user_id))]
    pub async fn setup_two_factor(&self, principal: &Principal) -> Result<TotpSetup, AccountError> {
        let user = self.require_user(principal).await?;
        if user.two_factor_enabled {
            return Err(AccountError::Rejected(
                "Two-factor authentication is already enabled".to_string(),
            ));
        }

        let secret = match user.authenticator_key {
            Some(key) if !key.is_empty() => key,
            _ => {
                let key = self.totp.generate_secret();
                self.store
                    .set_authenticator_key(user.id, Some(key.clone()))
                    .await?;
                debug!("Generated pending authenticator key");
                key
            }
        };

        Ok(self.totp.setup(&secret, &user.username)?)
    }

    /// Confirm the pending secret with a code and return a fresh batch of
    /// recovery codes.
    ///
    /// # Errors
    /// `Validation` for a malformed code, `Rejected` for a wrong one.
    #[instrument(skip(self, principal, code), fields(user_id = %principal.user_id))]
    pub async fn enable_two_factor(
        &self,
        principal: &Principal,
        code: &str,
    ) -> Result<Vec<String>, AccountError> {
        let mut errors = FieldErrors::new();
        check_two_factor_code(&mut errors, "code", code);
        errors.into_result()?;

        let user = self.require_user(principal).await?;
        if user.two_factor_enabled {
            return Err(AccountError::Rejected(
                "Two-factor authentication is already enabled".to_string(),
            ));
        }
        let Some(key) = user.authenticator_key.as_deref() else {
            return Err(AccountError::Rejected(
                "Set up an authenticator before enabling two-factor authentication".to_string(),
            ));
        };
        if !self
            .totp
            .verify(key, &normalize_code(code), self.clock.now())?
        {
            return Err(AccountError::Rejected("Invalid verification code".to_string()));
        }

        let batch = RecoveryCodeBatch::generate()?;
        self.store
            .replace_recovery_codes(user.id, batch.code_hashes)
            .await?;
        self.store.set_two_factor_enabled(user.id, true).await?;
        info!("Two-factor authentication enabled");
        Ok(batch.codes)
    }

    /// Turn two-factor off after a valid authenticator code, forgetting the
    /// shared secret and any remaining recovery codes.
    ///
    /// # Errors
    /// `Rejected` if two-factor is off or the code is wrong.
    #[instrument(skip(self, principal, code), fields(user_id = %principal.user_id))]
    pub async fn disable_two_factor(
        &self,
        principal: &Principal,
        code: &str,
    ) -> Result<(), AccountError> {
        let mut errors = FieldErrors::new();
        check_two_factor_code(&mut errors, "code", code);
        errors.into_result()?;

        let user = self.require_user(principal).await?;
        if !user.two_factor_enabled {
            return Err(AccountError::Rejected(
                "Two-factor authentication is not enabled".to_string(),
            ));
        }
        let verified = match user.authenticator_key.as_deref() {
            Some(key) => self
                .totp
                .verify(key, &normalize_code(code), self.clock.now())?,
            None => false,
        };
        if !verified {
            return Err(AccountError::Rejected("Invalid verification code".to_string()));
        }

        self.store.set_two_factor_enabled(user.id, false).await?;
        self.store.set_authenticator_key(user.id, None).await?;
        self.store.replace_recovery_codes(user.id, Vec::new()).await?;
        info!("Two-factor authentication disabled");
        Ok(())
    }

    /// # Errors
    /// `Rejected` unless two-factor is enabled.
    #[instrument(skip_all, fields(user_id = %principal.user_id))]
    pub async fn regenerate_recovery_codes(
        &self,
        principal: &Principal,
    ) -> Result<Vec<String>, AccountError> {
        let user = self.require_user(principal).await?;
        if !user.two_factor_enabled {
            return Err(AccountError::Rejected(
                "Two-factor authentication is not enabled".to_string(),
            ));
        }
        let batch = RecoveryCodeBatch::generate()?;
        self.store
            .replace_recovery_codes(user.id, batch.code_hashes)
            .await?;
        info!("Recovery codes regenerated");
        Ok(batch.codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        memory::MemoryUserStore,
        password::{Argon2Hasher, PasswordError, PasswordHasher},
        totp::TotpRsProvider,
    };
    use crate::token::{ManualClock, TokenConfig};
    use anyhow::{Result, anyhow};
    use chrono::Duration;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PASSWORD: &str = "Str0ng!pass";

    /// Counts password verifications.
    struct SpyHasher {
        inner: Argon2Hasher,
        verifications: AtomicUsize,
    }

    impl PasswordHasher for SpyHasher {
        fn hash(&self, password: &str) -> Result<String, PasswordError> {
            self.inner.hash(password)
        }

        fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, PasswordError> {
            self.verifications.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(password, stored_hash)
        }
    }

    struct Harness {
        service: AuthenticationService,
        clock: Arc<ManualClock>,
        hasher: Arc<SpyHasher>,
        totp: TotpRsProvider,
    }

    fn harness_with(rotation: RotationPolicy) -> Harness {
        let hasher = Arc::new(SpyHasher {
            inner: Argon2Hasher::insecure_fast(),
            verifications: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryUserStore::new(hasher.clone()));
        let clock = Arc::new(ManualClock::default());
        let issuer = TokenIssuer::new(
            TokenConfig::new(
                SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
                "https://auth.warden.test",
                "warden",
            )
            .with_rotation(rotation),
        );
        let totp = TotpRsProvider::new("Warden");
        let service = AuthenticationService::new(
            store,
            issuer,
            Arc::new(totp.clone()),
            AuthConfig::new(),
        )
        .with_clock(clock.clone());
        Harness {
            service,
            clock,
            hasher,
            totp,
        }
    }

    fn harness() -> Harness {
        harness_with(RotationPolicy::Rotate)
    }

    async fn register_alice(h: &Harness) -> Result<Principal> {
        let id = h.service.register("alice", PASSWORD, PASSWORD).await?;
        Ok(Principal {
            user_id: id,
            username: "alice".to_string(),
            roles: vec!["User".to_string()],
        })
    }

    async fn login_pair(h: &Harness) -> Result<TokenPair> {
        match h.service.login("alice", PASSWORD, None).await? {
            AuthOutcome::Tokens(pair) => Ok(pair),
            other => Err(anyhow!("unexpected outcome {other:?}")),
        }
    }

    async fn enable_two_factor(h: &Harness, principal: &Principal) -> Result<(String, Vec<String>)> {
        let setup = h.service.setup_two_factor(principal).await?;
        let code = h.totp.code_at(&setup.shared_key, h.clock.now())?;
        let codes = h.service.enable_two_factor(principal, &code).await?;
        Ok((setup.shared_key, codes))
    }

    #[tokio::test]
    async fn login_issues_tokens_for_subject() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        let pair = login_pair(&h).await?;
        let claims = h.service.codec().decode(&pair.access_token)?;
        assert_eq!(claims.subject, principal.user_id.to_string());
        assert_eq!(claims.display_name, "alice");
        assert_eq!(claims.roles, vec!["User".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() -> Result<()> {
        let h = harness();
        assert_eq!(
            h.service.login("nobody", PASSWORD, None).await?,
            AuthOutcome::NotFound
        );
        Ok(())
    }

    #[tokio::test]
    async fn lockout_skips_password_check() -> Result<()> {
        let h = harness();
        register_alice(&h).await?;

        for _ in 0..5 {
            assert_eq!(
                h.service.login("alice", "Wr0ng!pass", None).await?,
                AuthOutcome::InvalidCredentials
            );
        }
        let checks_before = h.hasher.verifications.load(Ordering::SeqCst);

        let outcome = h.service.login("alice", PASSWORD, None).await?;
        assert_eq!(outcome, AuthOutcome::Locked { minutes_left: 5 });
        assert_eq!(h.hasher.verifications.load(Ordering::SeqCst), checks_before);

        h.clock.advance(Duration::seconds(150));
        assert_eq!(
            h.service.login("alice", PASSWORD, None).await?,
            AuthOutcome::Locked { minutes_left: 3 }
        );

        h.clock.advance(Duration::seconds(150));
        assert!(h.service.login("alice", PASSWORD, None).await?.tokens().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn attempts_during_lockout_do_not_extend_it() -> Result<()> {
        let h = harness();
        register_alice(&h).await?;
        for _ in 0..5 {
            h.service.login("alice", "Wr0ng!pass", None).await?;
        }
        for _ in 0..10 {
            h.service.login("alice", "Wr0ng!pass", None).await?;
        }
        h.clock.advance(Duration::minutes(5));
        assert!(h.service.login("alice", PASSWORD, None).await?.tokens().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn success_resets_failure_counter() -> Result<()> {
        let h = harness();
        register_alice(&h).await?;
        for _ in 0..4 {
            h.service.login("alice", "Wr0ng!pass", None).await?;
        }
        login_pair(&h).await?;
        for _ in 0..4 {
            h.service.login("alice", "Wr0ng!pass", None).await?;
        }
        assert!(h.service.login("alice", PASSWORD, None).await?.tokens().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_old_token() -> Result<()> {
        let h = harness();
        register_alice(&h).await?;
        let pair = login_pair(&h).await?;

        let refreshed = h.service.refresh_token(&pair.refresh_token).await?;
        let new_pair = refreshed.tokens().cloned().ok_or_else(|| anyhow!("no tokens"))?;
        assert_ne!(new_pair.refresh_token, pair.refresh_token);
        assert_ne!(new_pair.access_token, pair.access_token);

        assert_eq!(
            h.service.refresh_token(&pair.refresh_token).await?,
            AuthOutcome::Unauthorized
        );
        assert!(h
            .service
            .refresh_token(&new_pair.refresh_token)
            .await?
            .tokens()
            .is_some());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_refresh_has_one_winner() -> Result<()> {
        let h = harness();
        register_alice(&h).await?;
        let pair = login_pair(&h).await?;

        let (a, b) = tokio::join!(
            h.service.refresh_token(&pair.refresh_token),
            h.service.refresh_token(&pair.refresh_token)
        );
        let winners = [a?, b?]
            .iter()
            .filter(|outcome| outcome.tokens().is_some())
            .count();
        assert_eq!(winners, 1);
        Ok(())
    }

    #[tokio::test]
    async fn reuse_policy_keeps_refresh_token() -> Result<()> {
        let h = harness_with(RotationPolicy::Reuse);
        register_alice(&h).await?;
        let pair = login_pair(&h).await?;
        for _ in 0..2 {
            let outcome = h.service.refresh_token(&pair.refresh_token).await?;
            let refreshed = outcome.tokens().ok_or_else(|| anyhow!("no tokens"))?;
            assert_eq!(refreshed.refresh_token, pair.refresh_token);
        }
        Ok(())
    }

    #[tokio::test]
    async fn expired_refresh_token_is_forgotten() -> Result<()> {
        let h = harness();
        register_alice(&h).await?;
        let pair = login_pair(&h).await?;
        h.clock.advance(Duration::days(8));
        assert_eq!(
            h.service.refresh_token(&pair.refresh_token).await?,
            AuthOutcome::Unauthorized
        );
        h.clock.advance(Duration::days(-8));
        assert_eq!(
            h.service.refresh_token(&pair.refresh_token).await?,
            AuthOutcome::Unauthorized
        );
        Ok(())
    }

    #[tokio::test]
    async fn logout_revokes_refresh_and_access_tokens() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        let pair = login_pair(&h).await?;
        assert!(h.service.authenticate(&pair.access_token).await?.is_some());

        h.service.logout(&principal).await?;
        h.service.logout(&principal).await?;

        assert!(h.service.authenticate(&pair.access_token).await?.is_none());
        assert_eq!(
            h.service.refresh_token(&pair.refresh_token).await?,
            AuthOutcome::Unauthorized
        );
        Ok(())
    }

    #[tokio::test]
    async fn authenticate_rejects_expired_and_garbage() -> Result<()> {
        let h = harness();
        register_alice(&h).await?;
        let pair = login_pair(&h).await?;
        assert!(h.service.authenticate("garbage").await?.is_none());
        h.clock.advance(Duration::minutes(16));
        assert!(h.service.authenticate(&pair.access_token).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn register_validates_and_rejects_duplicates() -> Result<()> {
        let h = harness();
        register_alice(&h).await?;
        let Err(AccountError::Validation(errors)) =
            h.service.register("alice", PASSWORD, PASSWORD).await
        else {
            return Err(anyhow!("duplicate accepted"));
        };
        assert!(errors.get("username").is_some());

        let Err(AccountError::Validation(errors)) =
            h.service.register("bob", "weak", "weaker").await
        else {
            return Err(anyhow!("weak password accepted"));
        };
        assert!(errors.get("password").is_some());
        assert!(errors.get("confirmPassword").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn change_password_requires_current() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        let result = h
            .service
            .change_password(&principal, "Wr0ng!pass", "N3w!password", "N3w!password")
            .await;
        assert!(matches!(result, Err(AccountError::Validation(_))));

        let same = h
            .service
            .change_password(&principal, PASSWORD, PASSWORD, PASSWORD)
            .await;
        assert!(matches!(same, Err(AccountError::Validation(_))));

        h.service
            .change_password(&principal, PASSWORD, "N3w!password", "N3w!password")
            .await?;
        assert_eq!(
            h.service.login("alice", PASSWORD, None).await?,
            AuthOutcome::InvalidCredentials
        );
        assert!(h
            .service
            .login("alice", "N3w!password", None)
            .await?
            .tokens()
            .is_some());
        Ok(())
    }

    #[tokio::test]
    async fn enable_two_factor_returns_ten_codes() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        let (_, codes) = enable_two_factor(&h, &principal).await?;
        assert_eq!(codes.len(), 10);
        let status = h.service.two_factor_status(&principal).await?;
        assert!(status.enabled);
        assert_eq!(status.recovery_codes_left, 10);
        Ok(())
    }

    #[tokio::test]
    async fn enable_with_unrelated_code_keeps_disabled() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        h.service.setup_two_factor(&principal).await?;
        let unrelated = h.totp.code_at(&h.totp.generate_secret(), h.clock.now())?;
        let result = h.service.enable_two_factor(&principal, &unrelated).await;
        assert!(matches!(result, Err(AccountError::Rejected(_))));
        assert!(!h.service.two_factor_status(&principal).await?.enabled);
        Ok(())
    }

    #[tokio::test]
    async fn setup_reuses_pending_key_and_refuses_when_enabled() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        let first = h.service.setup_two_factor(&principal).await?;
        let second = h.service.setup_two_factor(&principal).await?;
        assert_eq!(first.shared_key, second.shared_key);

        enable_two_factor(&h, &principal).await?;
        assert!(matches!(
            h.service.setup_two_factor(&principal).await,
            Err(AccountError::Rejected(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn login_with_two_factor() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        let (secret, _) = enable_two_factor(&h, &principal).await?;

        assert_eq!(
            h.service.login("alice", PASSWORD, None).await?,
            AuthOutcome::TwoFactorRequired
        );
        assert_eq!(
            h.service.login("alice", PASSWORD, Some("  ")).await?,
            AuthOutcome::TwoFactorRequired
        );
        assert_eq!(
            h.service.login("alice", PASSWORD, Some("000000")).await?,
            AuthOutcome::TwoFactorInvalid
        );

        let code = h.totp.code_at(&secret, h.clock.now())?;
        assert!(h
            .service
            .login("alice", PASSWORD, Some(&code))
            .await?
            .tokens()
            .is_some());
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_with_two_factor_is_invalid_credentials() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        enable_two_factor(&h, &principal).await?;
        assert_eq!(
            h.service.login("alice", "Wr0ng!pass", None).await?,
            AuthOutcome::InvalidCredentials
        );
        Ok(())
    }

    #[tokio::test]
    async fn recovery_code_logs_in_once() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        let (_, codes) = enable_two_factor(&h, &principal).await?;
        let code = codes.first().cloned().ok_or_else(|| anyhow!("no codes"))?;

        assert!(h
            .service
            .login("alice", PASSWORD, Some(&code.to_lowercase()))
            .await?
            .tokens()
            .is_some());
        assert_eq!(
            h.service.login("alice", PASSWORD, Some(&code)).await?,
            AuthOutcome::TwoFactorInvalid
        );
        assert_eq!(
            h.service.two_factor_status(&principal).await?.recovery_codes_left,
            9
        );
        Ok(())
    }

    #[tokio::test]
    async fn disable_two_factor_requires_valid_code() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        assert!(matches!(
            h.service.disable_two_factor(&principal, "123456").await,
            Err(AccountError::Rejected(_))
        ));

        let (secret, _) = enable_two_factor(&h, &principal).await?;
        assert!(matches!(
            h.service.disable_two_factor(&principal, "000000").await,
            Err(AccountError::Rejected(_))
        ));
        let code = h.totp.code_at(&secret, h.clock.now())?;
        h.service.disable_two_factor(&principal, &code).await?;

        let status = h.service.two_factor_status(&principal).await?;
        assert!(!status.enabled);
        assert_eq!(status.recovery_codes_left, 0);
        assert!(h.service.login("alice", PASSWORD, None).await?.tokens().is_some());

        // a new setup produces a new key
        let setup = h.service.setup_two_factor(&principal).await?;
        assert_ne!(setup.shared_key, secret);
        Ok(())
    }

    #[tokio::test]
    async fn recovery_codes_require_enabled_two_factor() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        assert!(matches!(
            h.service.regenerate_recovery_codes(&principal).await,
            Err(AccountError::Rejected(_))
        ));
        let (_, first) = enable_two_factor(&h, &principal).await?;
        let second = h.service.regenerate_recovery_codes(&principal).await?;
        assert_eq!(second.len(), 10);
        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_two_factor_code_is_validation_error() -> Result<()> {
        let h = harness();
        let principal = register_alice(&h).await?;
        h.service.setup_two_factor(&principal).await?;
        assert!(matches!(
            h.service.enable_two_factor(&principal, "12").await,
            Err(AccountError::Validation(_))
        ));
        Ok(())
    }
}
