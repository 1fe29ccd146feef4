//! Outbound request interceptor: attaches the bearer token and reacts to 401.

use super::session::SessionCache;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

pub const DEFAULT_LOGIN_PATH: &str = "/login";

#[derive(Debug, Error)]
pub enum GateError {
    #[error("session expired")]
    SessionExpired,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Where the user currently is, and how to send them somewhere else.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;
    fn navigate_to(&self, path: &str);
}

pub struct AuthGate {
    session: SessionCache,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    refresh_expired: bool,
}

impl AuthGate {
    #[must_use]
    pub fn new(session: SessionCache, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            session,
            navigator,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh_expired: false,
        }
    }

    #[must_use]
    pub fn with_login_path(mut self, login_path: impl Into<String>) -> Self {
        self.login_path = login_path.into();
        self
    }

    /// When enabled, an expired access token is refreshed before the request
    /// is sent. Off by default: an expired token logs out immediately.
    #[must_use]
    pub fn with_refresh_expired(mut self, refresh_expired: bool) -> Self {
        self.refresh_expired = refresh_expired;
        self
    }

    #[must_use]
    pub fn session(&self) -> &SessionCache {
        &self.session
    }

    /// Send `request` with the session's bearer token attached.
    ///
    /// Anonymous sessions send the request unchanged.
    ///
    /// # Errors
    /// `SessionExpired` when the stored token is expired (the request is not
    /// sent), or the transport error.
    #[instrument(skip_all)]
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, GateError> {
        let request = match self.bearer_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Request unauthorized, ending session");
            self.session.mark_logged_out().await;
            self.redirect_to_login();
        }
        Ok(response)
    }

    async fn bearer_token(&self) -> Result<Option<String>, GateError> {
        let Some(token) = self.session.current_access_token().await else {
            return Ok(None);
        };
        if !self.session.is_expired(&token) {
            return Ok(Some(token));
        }

        if self.refresh_expired {
            self.session.refresh_if_needed().await;
            if let Some(token) = self.session.current_access_token().await {
                if !self.session.is_expired(&token) {
                    return Ok(Some(token));
                }
            }
        }

        debug!("Access token expired, ending session");
        self.session.mark_logged_out().await;
        self.redirect_to_login();
        Err(GateError::SessionExpired)
    }

    fn redirect_to_login(&self) {
        let current = self.navigator.current_path();
        let path = current.split(['?', '#']).next().unwrap_or_default();
        if path != self.login_path {
            self.navigator.navigate_to(&self.login_path);
        }
    }
}
