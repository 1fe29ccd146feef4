use super::{claims::ClaimSet, codec::TokenCodec, error::TokenError};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 900;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
pub const DEFAULT_REFRESH_TOKEN_LENGTH: usize = 64;
pub const MIN_REFRESH_TOKEN_LENGTH: u16 = 16;
/// Ten years. Longer lifetimes are refused by the CLI.
pub const MAX_TOKEN_TTL_SECONDS: i64 = 315_360_000;

/// What happens to the refresh token when it is redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationPolicy {
    /// Every refresh issues a new refresh token and invalidates the old one.
    #[default]
    Rotate,
    /// The refresh token is reused until it expires.
    Reuse,
}

impl FromStr for RotationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rotate" => Ok(Self::Rotate),
            "reuse" => Ok(Self::Reuse),
            other => Err(format!("unknown rotation policy: {other}")),
        }
    }
}

impl fmt::Display for RotationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rotate => f.write_str("rotate"),
            Self::Reuse => f.write_str("reuse"),
        }
    }
}

#[derive(Clone)]
pub struct TokenConfig {
    secret: SecretString,
    issuer: String,
    audience: String,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    refresh_token_length: usize,
    rotation: RotationPolicy,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("refresh_token_length", &self.refresh_token_length)
            .field("rotation", &self.rotation)
            .finish_non_exhaustive()
    }
}

impl TokenConfig {
    #[must_use]
    pub fn new(secret: SecretString, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            secret,
            issuer: issuer.into(),
            audience: audience.into(),
            access_token_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            refresh_token_ttl: Duration::seconds(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
            refresh_token_length: DEFAULT_REFRESH_TOKEN_LENGTH,
            rotation: RotationPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_token_length(mut self, length: usize) -> Self {
        self.refresh_token_length = length;
        self
    }

    #[must_use]
    pub fn with_rotation(mut self, rotation: RotationPolicy) -> Self {
        self.rotation = rotation;
        self
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub fn rotation(&self) -> RotationPolicy {
        self.rotation
    }

    /// A codec that verifies tokens minted with this configuration.
    #[must_use]
    pub fn codec(&self) -> TokenCodec {
        TokenCodec::new(&self.secret, self.issuer.clone(), self.audience.clone())
    }
}

/// The identity fields an access token is minted from.
#[derive(Debug, Clone, Copy)]
pub struct AccessSubject<'a> {
    pub id: Uuid,
    pub display_name: &'a str,
    pub roles: &'a [String],
    pub security_stamp: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct TokenIssuer {
    config: TokenConfig,
    codec: TokenCodec,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        let codec = config.codec();
        Self { config, codec }
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Mint a signed access token expiring `access_token_ttl` after `now`.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be serialized or signed.
    pub fn issue_access_token(
        &self,
        subject: AccessSubject<'_>,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = ClaimSet {
            subject: subject.id.to_string(),
            display_name: subject.display_name.to_string(),
            token_id: Uuid::new_v4().to_string(),
            roles: subject.roles.to_vec(),
            issuer: Some(self.config.issuer.clone()),
            audience: Some(self.config.audience.clone()),
            issued_at: Some(now.timestamp()),
            expires_at: Some(expiry(now, self.config.access_token_ttl)?.timestamp()),
            security_stamp: Some(subject.security_stamp.to_string()),
        };
        self.codec.encode(&claims)
    }

    /// Opaque refresh token: `refresh_token_length` random bytes, base64 encoded.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn issue_refresh_token(&self) -> Result<String, TokenError> {
        let mut bytes = vec![0u8; self.config.refresh_token_length];
        OsRng.try_fill_bytes(&mut bytes)?;
        Ok(Base64::encode_string(&bytes))
    }

    /// # Errors
    /// `LifetimeOutOfRange` when `now + refresh_token_ttl` is not representable.
    pub fn refresh_token_expiry(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, TokenError> {
        expiry(now, self.config.refresh_token_ttl)
    }

    /// # Errors
    /// Returns an error if either token cannot be produced.
    pub fn issue_token_pair(
        &self,
        subject: AccessSubject<'_>,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(subject, now)?,
            refresh_token: self.issue_refresh_token()?,
        })
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, TokenError> {
    now.checked_add_signed(ttl)
        .ok_or(TokenError::LifetimeOutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            TokenConfig::new(
                SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
                "https://auth.warden.test",
                "warden",
            )
            .with_access_token_ttl(Duration::seconds(60)),
        )
    }

    #[test]
    fn access_token_carries_identity() -> Result<()> {
        let issuer = issuer();
        let id = Uuid::now_v7();
        let roles = vec!["User".to_string()];
        let now = Utc::now();
        let token = issuer.issue_access_token(
            AccessSubject {
                id,
                display_name: "alice",
                roles: &roles,
                security_stamp: "s1",
            },
            now,
        )?;
        let claims = issuer.codec().decode(&token)?;
        assert_eq!(claims.subject, id.to_string());
        assert_eq!(claims.display_name, "alice");
        assert_eq!(claims.roles, roles);
        assert_eq!(claims.expires_at, Some(now.timestamp() + 60));
        assert_eq!(claims.security_stamp.as_deref(), Some("s1"));
        assert!(!claims.token_id.is_empty());
        Ok(())
    }

    #[test]
    fn refresh_tokens_are_random_and_sized() -> Result<()> {
        let issuer = issuer();
        let a = issuer.issue_refresh_token()?;
        let b = issuer.issue_refresh_token()?;
        assert_ne!(a, b);
        assert_eq!(Base64::decode_vec(&a).map(|v| v.len()).ok(), Some(64));
        Ok(())
    }

    #[test]
    fn rotation_policy_parses() {
        assert_eq!("rotate".parse::<RotationPolicy>(), Ok(RotationPolicy::Rotate));
        assert_eq!("REUSE".parse::<RotationPolicy>(), Ok(RotationPolicy::Reuse));
        assert!("sometimes".parse::<RotationPolicy>().is_err());
    }

    #[test]
    fn oversized_lifetimes_fail_instead_of_panicking() -> Result<()> {
        let issuer = TokenIssuer::new(
            TokenConfig::new(
                SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
                "https://auth.warden.test",
                "warden",
            )
            .with_access_token_ttl(Duration::seconds(10_000_000_000_000))
            .with_refresh_token_ttl(Duration::seconds(10_000_000_000_000)),
        );
        let now = Utc::now();
        assert!(matches!(
            issuer.refresh_token_expiry(now),
            Err(TokenError::LifetimeOutOfRange)
        ));
        let roles = Vec::new();
        let result = issuer.issue_access_token(
            AccessSubject {
                id: Uuid::now_v7(),
                display_name: "alice",
                roles: &roles,
                security_stamp: "s1",
            },
            now,
        );
        assert!(matches!(result, Err(TokenError::LifetimeOutOfRange)));

        let sane = issuer.config().clone().with_refresh_token_ttl(Duration::seconds(60));
        assert_eq!(
            TokenIssuer::new(sane).refresh_token_expiry(now)?,
            now + Duration::seconds(60)
        );
        Ok(())
    }
}
