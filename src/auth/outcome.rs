//! Typed results of the authentication service.
//!
//! Rejections are values; only storage, signing and randomness failures are
//! errors.

use super::{store::StoreError, totp::TotpError, validation::FieldErrors};
use crate::token::{TokenError, TokenPair};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Tokens(TokenPair),
    NotFound,
    Locked { minutes_left: i64 },
    InvalidCredentials,
    TwoFactorRequired,
    TwoFactorInvalid,
    Unauthorized,
}

impl AuthOutcome {
    #[must_use]
    pub fn tokens(&self) -> Option<&TokenPair> {
        match self {
            Self::Tokens(pair) => Some(pair),
            _ => None,
        }
    }
}

/// Fatal service failures, surfaced as 5xx.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Totp(#[from] TotpError),
    #[error("random source failure: {0}")]
    Random(#[from] rand::Error),
}

/// Result of account and two-factor management operations.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Fatal(#[from] AuthError),
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        Self::Fatal(AuthError::Storage(err))
    }
}

impl From<TotpError> for AccountError {
    fn from(err: TotpError) -> Self {
        Self::Fatal(AuthError::Totp(err))
    }
}

impl From<rand::Error> for AccountError {
    fn from(err: rand::Error) -> Self {
        Self::Fatal(AuthError::Random(err))
    }
}

impl From<FieldErrors> for AccountError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}

/// The authenticated caller, resolved from a verified access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub recovery_codes_left: usize,
}
