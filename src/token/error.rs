use thiserror::Error;

/// Reasons an access token fails to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed token")]
    MalformedToken,
    #[error("bad signature")]
    BadSignature,
    #[error("unexpected issuer or audience")]
    UnexpectedIssuerOrAudience,
}

/// Failures while minting tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("invalid signing key")]
    InvalidKey,
    #[error("random source failure")]
    Random(#[from] rand::Error),
    #[error("token lifetime out of range")]
    LifetimeOutOfRange,
}
