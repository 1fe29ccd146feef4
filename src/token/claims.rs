use serde::{Deserialize, Deserializer, Serialize};

/// Decoded content of an access token.
///
/// Field names on the wire follow the registered JWT claim names; `role`
/// is accepted either as a single string or as an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(rename = "nickname", default)]
    pub display_name: String,
    #[serde(rename = "jti", default)]
    pub token_id: String,
    #[serde(
        rename = "role",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub roles: Vec<String>,
    #[serde(rename = "iss", default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(rename = "aud", default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(rename = "iat", default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(rename = "sstamp", default, skip_serializing_if = "Option::is_none")]
    pub security_stamp: Option<String>,
}

impl ClaimSet {
    /// A missing expiry counts as expired.
    #[must_use]
    pub fn is_expired_at(&self, now_unix_seconds: i64) -> bool {
        self.expires_at.map_or(true, |exp| exp <= now_unix_seconds)
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(role) => vec![role],
        OneOrMany::Many(roles) => roles,
    })
}
