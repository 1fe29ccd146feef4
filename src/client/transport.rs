//! The call SessionCache makes to exchange a refresh token.

use crate::{api::APP_USER_AGENT, token::TokenPair};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("refresh rejected with status {0}")]
    Rejected(StatusCode),
    #[error("malformed refresh response")]
    Malformed,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait RefreshTransport: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TransportError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenBody<'a> {
    refresh_token: &'a str,
}

/// POSTs `{"refreshToken": ..}` to `{base}/auth/refresh-token`.
#[derive(Debug, Clone)]
pub struct HttpRefreshTransport {
    client: Client,
    endpoint: String,
}

impl HttpRefreshTransport {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing client; its timeout applies.
    #[must_use]
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/auth/refresh-token", base_url.trim_end_matches('/')),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RefreshTokenBody { refresh_token })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "Refresh rejected");
            return Err(TransportError::Rejected(status));
        }

        let pair: TokenPair = response
            .json()
            .await
            .map_err(|_| TransportError::Malformed)?;
        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            return Err(TransportError::Malformed);
        }
        Ok(pair)
    }
}
