//! Problem-details responses shared by the auth handlers.

use crate::auth::{AccountError, AuthError, FieldErrors};
use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;
use utoipa::ToSchema;

pub const TWO_FACTOR_REQUIRED: &str = "2FARequired";
const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Problem {
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    #[schema(value_type = Object)]
    pub extensions: Map<String, Value>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct ValidationProblem {
    pub title: String,
    pub status: u16,
    pub errors: FieldErrors,
}

impl Problem {
    #[must_use]
    pub fn new(status: StatusCode, detail: Option<String>) -> Self {
        Self {
            title: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            status: status.as_u16(),
            detail,
            extensions: Map::new(),
        }
    }

    #[must_use]
    pub fn with_extension(mut self, key: &str, value: Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        with_problem_type(status, Json(self).into_response())
    }
}

impl IntoResponse for ValidationProblem {
    fn into_response(self) -> Response {
        with_problem_type(StatusCode::BAD_REQUEST, Json(self).into_response())
    }
}

fn with_problem_type(status: StatusCode, mut response: Response) -> Response {
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE));
    response
}

pub fn problem(status: StatusCode, detail: impl Into<String>) -> Response {
    Problem::new(status, Some(detail.into())).into_response()
}

pub fn validation(errors: FieldErrors) -> Response {
    ValidationProblem {
        title: "One or more validation errors occurred.".to_string(),
        status: StatusCode::BAD_REQUEST.as_u16(),
        errors,
    }
    .into_response()
}

pub fn missing_payload() -> Response {
    problem(StatusCode::BAD_REQUEST, "Missing payload")
}

pub fn unauthorized() -> Response {
    StatusCode::UNAUTHORIZED.into_response()
}

/// Log the fault, answer with an opaque 500.
pub fn internal(err: &AuthError) -> Response {
    error!("Authentication service failure: {err}");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

pub fn account_error(err: AccountError) -> Response {
    match err {
        AccountError::Unauthorized => unauthorized(),
        AccountError::Validation(errors) => validation(errors),
        AccountError::Rejected(detail) => problem(StatusCode::BAD_REQUEST, detail),
        AccountError::Fatal(err) => internal(&err),
    }
}
