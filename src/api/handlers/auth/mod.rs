//! Account endpoints: register, login, refresh, change password, logout.
//!
//! Login outcomes map to status codes as follows: tokens 200, lockout 429,
//! missing second factor 401 with the `2FARequired` extension, every other
//! rejection a generic 401 (or 404 for unknown users when configured).

pub mod types;

use super::{problem, require_auth};
use crate::{
    auth::{AuthOutcome, AuthenticationService, FieldErrors},
    token::TokenPair,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;
use types::{ChangePasswordRequest, LoginRequest, RefreshTokenRequest, RegisterRequest, RegisterResponse};

const INVALID_CREDENTIALS: &str = "Invalid username or password";

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User created.", body = RegisterResponse),
        (status = 400, description = "Validation failed.", body = problem::ValidationProblem),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    service: Extension<Arc<AuthenticationService>>,
    payload: Option<Json<RegisterRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return problem::missing_payload();
    };
    match service
        .register(&request.username, &request.password, &request.confirm_password)
        .await
    {
        Ok(id) => (StatusCode::OK, Json(RegisterResponse { id })).into_response(),
        Err(err) => problem::account_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated.", body = TokenPair),
        (status = 400, description = "Validation failed.", body = problem::ValidationProblem),
        (status = 401, description = "Invalid credentials or second factor required.", body = problem::Problem),
        (status = 404, description = "Unknown user (only when enabled)."),
        (status = 429, description = "Account locked out.", body = problem::Problem),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    service: Extension<Arc<AuthenticationService>>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return problem::missing_payload();
    };

    let mut errors = FieldErrors::new();
    if request.username.trim().is_empty() {
        errors.add("username", "Username is required");
    }
    if request.password.is_empty() {
        errors.add("password", "Password is required");
    }
    if let Err(errors) = errors.into_result() {
        return problem::validation(errors);
    }

    let outcome = service
        .login(
            request.username.trim(),
            &request.password,
            request.two_factor_code.as_deref(),
        )
        .await;

    match outcome {
        Ok(outcome) => login_response(outcome, service.config().reveal_unknown_users()),
        Err(err) => problem::internal(&err),
    }
}

fn login_response(outcome: AuthOutcome, reveal_unknown_users: bool) -> Response {
    match outcome {
        AuthOutcome::Tokens(pair) => (StatusCode::OK, Json(pair)).into_response(),
        AuthOutcome::NotFound if reveal_unknown_users => {
            problem::problem(StatusCode::NOT_FOUND, "User not found")
        }
        AuthOutcome::Locked { minutes_left } => problem::problem(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Account is locked. Try again in {minutes_left} minute(s)"),
        ),
        AuthOutcome::TwoFactorRequired => problem::Problem::new(
            StatusCode::UNAUTHORIZED,
            Some("Two-factor authentication code required".to_string()),
        )
        .with_extension(problem::TWO_FACTOR_REQUIRED, Value::Bool(true))
        .into_response(),
        AuthOutcome::NotFound
        | AuthOutcome::InvalidCredentials
        | AuthOutcome::TwoFactorInvalid => {
            problem::problem(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS)
        }
        AuthOutcome::Unauthorized => problem::unauthorized(),
    }
}

#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New token pair.", body = TokenPair),
        (status = 400, description = "Missing refresh token.", body = problem::ValidationProblem),
        (status = 401, description = "Unknown, expired or already rotated refresh token."),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh_token(
    service: Extension<Arc<AuthenticationService>>,
    payload: Option<Json<RefreshTokenRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return problem::missing_payload();
    };
    if request.refresh_token.trim().is_empty() {
        return problem::validation(FieldErrors::single(
            "refreshToken",
            "Refresh token is required",
        ));
    }
    match service.refresh_token(request.refresh_token.trim()).await {
        Ok(AuthOutcome::Tokens(pair)) => (StatusCode::OK, Json(pair)).into_response(),
        Ok(_) => problem::unauthorized(),
        Err(err) => problem::internal(&err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed."),
        (status = 400, description = "Validation failed.", body = problem::ValidationProblem),
        (status = 401, description = "Missing or invalid bearer token."),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn change_password(
    headers: HeaderMap,
    service: Extension<Arc<AuthenticationService>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let Some(Json(request)) = payload else {
        return problem::missing_payload();
    };
    match service
        .change_password(
            &principal,
            &request.current_password,
            &request.new_password,
            &request.confirm_new_password,
        )
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => problem::account_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out; refresh token and access tokens revoked."),
        (status = 401, description = "Missing or invalid bearer token."),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(headers: HeaderMap, service: Extension<Arc<AuthenticationService>>) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    match service.logout(&principal).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => problem::internal(&err),
    }
}
