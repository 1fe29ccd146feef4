//! Input rules for credentials and one-time codes.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_TWO_FACTOR_CODE_LEN: usize = 6;

/// Validation messages keyed by request field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` when nothing was recorded.
    ///
    /// # Errors
    /// Returns `self` when at least one field failed.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

fn matches(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).is_ok_and(|regex| regex.is_match(value))
}

pub fn check_username(errors: &mut FieldErrors, field: &str, username: &str) {
    if username.trim().is_empty() {
        errors.add(field, "Username is required");
    }
}

/// Password policy applied on registration and password change.
pub fn check_password_policy(errors: &mut FieldErrors, field: &str, password: &str) {
    if password.is_empty() {
        errors.add(field, "Password is required");
        return;
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            field,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        );
    }
    if !matches("[A-Z]", password) {
        errors.add(field, "Password must contain an uppercase letter");
    }
    if !matches("[a-z]", password) {
        errors.add(field, "Password must contain a lowercase letter");
    }
    if !matches("[0-9]", password) {
        errors.add(field, "Password must contain a digit");
    }
    if !matches("[^a-zA-Z0-9]", password) {
        errors.add(field, "Password must contain a special character");
    }
}

pub fn check_two_factor_code(errors: &mut FieldErrors, field: &str, code: &str) {
    let code = code.trim();
    if code.is_empty() {
        errors.add(field, "Authentication code is required");
    } else if code.chars().count() < MIN_TWO_FACTOR_CODE_LEN {
        errors.add(
            field,
            format!("Code must be at least {MIN_TWO_FACTOR_CODE_LEN} characters"),
        );
    }
}

/// Strip separators users tend to type into authenticator codes.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}
