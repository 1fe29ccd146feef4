//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterResponse {
    pub id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub two_factor_code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorCodeRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryCodesResponse {
    pub recovery_codes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn login_request_accepts_missing_two_factor_code() -> Result<()> {
        let request: LoginRequest =
            serde_json::from_str(r#"{"username":"alice","password":"Str0ng!pass"}"#)?;
        assert!(request.two_factor_code.is_none());
        Ok(())
    }

    #[test]
    fn change_password_uses_camel_case() -> Result<()> {
        let value = serde_json::to_value(ChangePasswordRequest {
            current_password: "a".to_string(),
            new_password: "b".to_string(),
            confirm_new_password: "b".to_string(),
        })?;
        let confirm = value
            .get("confirmNewPassword")
            .and_then(serde_json::Value::as_str)
            .context("missing confirmNewPassword")?;
        assert_eq!(confirm, "b");
        Ok(())
    }
}
