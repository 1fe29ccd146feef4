//! Time-based one-time passwords (RFC 6238): SHA-1, 6 digits, 30 s step,
//! one step of skew either way.

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};
use utoipa::ToSchema;

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum TotpError {
    #[error("invalid shared secret")]
    Secret,
    #[error("totp init error: {0}")]
    Init(String),
    #[error("qr gen error: {0}")]
    Qr(String),
}

/// Material handed to the user to enrol an authenticator app.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TotpSetup {
    /// Base32 shared key for manual entry.
    pub shared_key: String,
    /// `otpauth://totp/...` provisioning URI.
    #[serde(skip_serializing)]
    pub provisioning_uri: String,
    /// `data:image/png;base64,...`
    pub qr_code_image: String,
}

pub trait TotpProvider: Send + Sync {
    /// Fresh 160-bit secret, base32 encoded.
    fn generate_secret(&self) -> String;

    /// # Errors
    /// Returns an error if the secret or account name is unusable.
    fn setup(&self, secret: &str, account: &str) -> Result<TotpSetup, TotpError>;

    /// # Errors
    /// Returns an error if the secret is not valid base32.
    fn verify(&self, secret: &str, code: &str, now: DateTime<Utc>) -> Result<bool, TotpError>;
}

#[derive(Debug, Clone)]
pub struct TotpRsProvider {
    issuer: String,
}

impl TotpRsProvider {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    fn totp(&self, secret: &str, account: &str) -> Result<TOTP, TotpError> {
        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|_| TotpError::Secret)?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| TotpError::Init(e.to_string()))
    }

    /// Code an authenticator app would show at `now`.
    ///
    /// # Errors
    /// Returns an error if the secret is not valid base32.
    pub fn code_at(&self, secret: &str, now: DateTime<Utc>) -> Result<String, TotpError> {
        Ok(self.totp(secret, "")?.generate(unix_seconds(now)))
    }
}

impl TotpProvider for TotpRsProvider {
    fn generate_secret(&self) -> String {
        Secret::generate_secret().to_encoded().to_string()
    }

    fn setup(&self, secret: &str, account: &str) -> Result<TotpSetup, TotpError> {
        let totp = self.totp(secret, account)?;
        let qr = totp.get_qr_png().map_err(TotpError::Qr)?;
        Ok(TotpSetup {
            shared_key: totp.get_secret_base32(),
            provisioning_uri: totp.get_url(),
            qr_code_image: format!("data:image/png;base64,{}", Base64::encode_string(&qr)),
        })
    }

    fn verify(&self, secret: &str, code: &str, now: DateTime<Utc>) -> Result<bool, TotpError> {
        Ok(self.totp(secret, "")?.check(code, unix_seconds(now)))
    }
}

fn unix_seconds(now: DateTime<Utc>) -> u64 {
    u64::try_from(now.timestamp()).unwrap_or_default()
}
