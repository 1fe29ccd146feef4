//! API handlers and the bearer-token principal lookup they share.

pub mod auth;
pub mod health;
pub mod problem;
pub mod two_factor;

use crate::auth::{AuthenticationService, Principal};
use axum::{
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use tracing::debug;

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolve the bearer token into a principal, or answer 401.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    service: &AuthenticationService,
) -> Result<Principal, Response> {
    let Some(token) = extract_bearer_token(headers) else {
        debug!("Missing bearer token");
        return Err(problem::unauthorized());
    };
    match service.authenticate(&token).await {
        Ok(Some(principal)) => Ok(principal),
        Ok(None) => Err(problem::unauthorized()),
        Err(err) => Err(problem::internal(&err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn other_schemes_and_empty_tokens_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(extract_bearer_token(&headers).is_none());
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(extract_bearer_token(&headers).is_none());
        assert!(extract_bearer_token(&HeaderMap::new()).is_none());
    }
}
