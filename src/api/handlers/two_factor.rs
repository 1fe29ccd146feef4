//! Two-factor management endpoints. All of them require a bearer token.

use super::{
    auth::types::{RecoveryCodesResponse, TwoFactorCodeRequest},
    problem, require_auth,
};
use crate::auth::{AuthenticationService, TotpSetup, TwoFactorStatus};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    get,
    path = "/auth/2fa",
    responses(
        (status = 200, description = "Two-factor state.", body = TwoFactorStatus),
        (status = 401, description = "Missing or invalid bearer token."),
    ),
    security(("bearer" = [])),
    tag = "2fa"
)]
pub async fn status(headers: HeaderMap, service: Extension<Arc<AuthenticationService>>) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    match service.two_factor_status(&principal).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(err) => problem::account_error(err),
    }
}

#[utoipa::path(
    get,
    path = "/auth/2fa/setup",
    responses(
        (status = 200, description = "Pending shared key and QR code.", body = TotpSetup),
        (status = 400, description = "Two-factor already enabled.", body = problem::Problem),
        (status = 401, description = "Missing or invalid bearer token."),
    ),
    security(("bearer" = [])),
    tag = "2fa"
)]
#[instrument(skip_all)]
pub async fn setup(headers: HeaderMap, service: Extension<Arc<AuthenticationService>>) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    match service.setup_two_factor(&principal).await {
        Ok(setup) => (StatusCode::OK, Json(setup)).into_response(),
        Err(err) => problem::account_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/2fa/enable",
    request_body = TwoFactorCodeRequest,
    responses(
        (status = 200, description = "Enabled; one-time recovery codes.", body = RecoveryCodesResponse),
        (status = 400, description = "Invalid code.", body = problem::Problem),
        (status = 401, description = "Missing or invalid bearer token."),
    ),
    security(("bearer" = [])),
    tag = "2fa"
)]
#[instrument(skip_all)]
pub async fn enable(
    headers: HeaderMap,
    service: Extension<Arc<AuthenticationService>>,
    payload: Option<Json<TwoFactorCodeRequest>>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let Some(Json(request)) = payload else {
        return problem::missing_payload();
    };
    match service.enable_two_factor(&principal, &request.code).await {
        Ok(recovery_codes) => {
            (StatusCode::OK, Json(RecoveryCodesResponse { recovery_codes })).into_response()
        }
        Err(err) => problem::account_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/2fa/disable",
    request_body = TwoFactorCodeRequest,
    responses(
        (status = 200, description = "Disabled."),
        (status = 400, description = "Not enabled or invalid code.", body = problem::Problem),
        (status = 401, description = "Missing or invalid bearer token."),
    ),
    security(("bearer" = [])),
    tag = "2fa"
)]
#[instrument(skip_all)]
pub async fn disable(
    headers: HeaderMap,
    service: Extension<Arc<AuthenticationService>>,
    payload: Option<Json<TwoFactorCodeRequest>>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let Some(Json(request)) = payload else {
        return problem::missing_payload();
    };
    match service.disable_two_factor(&principal, &request.code).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => problem::account_error(err),
    }
}

#[utoipa::path(
    get,
    path = "/auth/2fa/recovery-codes",
    responses(
        (status = 200, description = "A new batch of recovery codes; older codes stop working.", body = RecoveryCodesResponse),
        (status = 400, description = "Two-factor not enabled.", body = problem::Problem),
        (status = 401, description = "Missing or invalid bearer token."),
    ),
    security(("bearer" = [])),
    tag = "2fa"
)]
#[instrument(skip_all)]
pub async fn recovery_codes(
    headers: HeaderMap,
    service: Extension<Arc<AuthenticationService>>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    match service.regenerate_recovery_codes(&principal).await {
        Ok(recovery_codes) => {
            (StatusCode::OK, Json(RecoveryCodesResponse { recovery_codes })).into_response()
        }
        Err(err) => problem::account_error(err),
    }
}
