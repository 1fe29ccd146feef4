//! Compact HS256 access tokens: `base64url(header).base64url(claims).base64url(mac)`.
//!
//! The codec verifies signature, issuer and audience when it holds a key.
//! A keyless codec (client side) only parses, so it can inspect expiry
//! without ever being able to vouch for a token.

use super::{claims::ClaimSet, error::DecodeError, error::TokenError};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{fmt, sync::Arc};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "HS256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    key: Option<Arc<[u8]>>,
    issuer: Option<String>,
    audience: Option<String>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("key", &self.key.as_ref().map(|_| "***"))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

impl TokenCodec {
    /// Server-side codec: signs, and verifies signature, issuer and audience.
    #[must_use]
    pub fn new(secret: &SecretString, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            key: Some(Arc::from(secret.expose_secret().as_bytes())),
            issuer: Some(issuer.into()),
            audience: Some(audience.into()),
        }
    }

    /// Client-side codec: parses structure only.
    #[must_use]
    pub fn unverified() -> Self {
        Self {
            key: None,
            issuer: None,
            audience: None,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    #[must_use]
    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    /// Sign a claim set.
    ///
    /// # Errors
    /// Returns an error if the codec holds no key or the claims cannot be encoded.
    pub fn encode(&self, claims: &ClaimSet) -> Result<String, TokenError> {
        let key = self.key.as_deref().ok_or(TokenError::InvalidKey)?;
        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| TokenError::InvalidKey)?;
        mac.update(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Parse a token into its claims. Expiry is not checked here.
    ///
    /// # Errors
    /// - `MalformedToken` if the structure, base64 or json cannot be parsed,
    /// - `BadSignature` if the MAC does not verify,
    /// - `UnexpectedIssuerOrAudience` if `iss`/`aud` differ from configuration.
    pub fn decode(&self, token: &str) -> Result<ClaimSet, DecodeError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(DecodeError::MalformedToken)?;
        let claims_b64 = parts.next().ok_or(DecodeError::MalformedToken)?;
        let sig_b64 = parts.next().ok_or(DecodeError::MalformedToken)?;
        if parts.next().is_some() {
            return Err(DecodeError::MalformedToken);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        let claims: ClaimSet = b64d_json(claims_b64)?;

        if let Some(key) = self.key.as_deref() {
            if header.alg != ALGORITHM {
                return Err(DecodeError::MalformedToken);
            }
            let signature =
                Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| DecodeError::MalformedToken)?;
            let mut mac = HmacSha256::new_from_slice(key).map_err(|_| DecodeError::BadSignature)?;
            mac.update(header_b64.as_bytes());
            mac.update(b".");
            mac.update(claims_b64.as_bytes());
            mac.verify_slice(&signature)
                .map_err(|_| DecodeError::BadSignature)?;
        }

        if let Some(issuer) = &self.issuer {
            if claims.issuer.as_deref() != Some(issuer.as_str()) {
                return Err(DecodeError::UnexpectedIssuerOrAudience);
            }
        }
        if let Some(audience) = &self.audience {
            if claims.audience.as_deref() != Some(audience.as_str()) {
                return Err(DecodeError::UnexpectedIssuerOrAudience);
            }
        }

        Ok(claims)
    }

    /// Fail-closed expiry check: anything that does not decode, or carries no
    /// usable `exp`, is expired.
    #[must_use]
    pub fn is_expired(&self, token: &str, now_unix_seconds: i64) -> bool {
        self.decode(token)
            .map_or(true, |claims| claims.is_expired_at(now_unix_seconds))
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, DecodeError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| DecodeError::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| DecodeError::MalformedToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> TokenCodec {
        TokenCodec::new(
            &SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
            "https://auth.warden.test",
            "warden",
        )
    }

    fn claims(exp: Option<i64>) -> ClaimSet {
        ClaimSet {
            subject: "0191f3a0-0000-7000-8000-000000000001".to_string(),
            display_name: "alice".to_string(),
            token_id: "jti-1".to_string(),
            roles: vec!["User".to_string()],
            issuer: Some("https://auth.warden.test".to_string()),
            audience: Some("warden".to_string()),
            issued_at: Some(NOW),
            expires_at: exp,
            security_stamp: Some("stamp".to_string()),
        }
    }

    #[test]
    fn encode_then_decode_preserves_claims() -> Result<(), TokenError> {
        let codec = codec();
        let token = codec.encode(&claims(Some(NOW + 60)))?;
        assert_eq!(token.split('.').count(), 3);
        let decoded = codec.decode(&token).map_err(|_| TokenError::InvalidKey)?;
        assert_eq!(decoded, claims(Some(NOW + 60)));
        assert!(!codec.is_expired(&token, NOW));
        Ok(())
    }

    #[test]
    fn tampered_payload_fails_signature() -> Result<(), TokenError> {
        let codec = codec();
        let token = codec.encode(&claims(Some(NOW + 60)))?;
        let mut forged = claims(Some(NOW + 60));
        forged.roles.push("Admin".to_string());
        let forged_b64 = b64e_json(&forged)?;
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_b64, parts[2]);
        assert_eq!(codec.decode(&tampered), Err(DecodeError::BadSignature));
        Ok(())
    }

    #[test]
    fn other_key_fails_signature() -> Result<(), TokenError> {
        let token = codec().encode(&claims(Some(NOW + 60)))?;
        let other = TokenCodec::new(
            &SecretString::from("ffffffffffffffffffffffffffffffff".to_string()),
            "https://auth.warden.test",
            "warden",
        );
        assert_eq!(other.decode(&token), Err(DecodeError::BadSignature));
        Ok(())
    }

    #[test]
    fn issuer_and_audience_mismatch_rejected() -> Result<(), TokenError> {
        let token = codec().encode(&claims(Some(NOW + 60)))?;
        let secret = SecretString::from("0123456789abcdef0123456789abcdef".to_string());
        let wrong_aud = TokenCodec::new(&secret, "https://auth.warden.test", "other");
        let wrong_iss = TokenCodec::new(&secret, "https://elsewhere.test", "warden");
        assert_eq!(
            wrong_aud.decode(&token),
            Err(DecodeError::UnexpectedIssuerOrAudience)
        );
        assert_eq!(
            wrong_iss.decode(&token),
            Err(DecodeError::UnexpectedIssuerOrAudience)
        );
        Ok(())
    }

    #[test]
    fn alg_none_rejected_by_verifying_codec() -> Result<(), TokenError> {
        let header = b64e_json(&TokenHeader {
            alg: "none".to_string(),
            typ: "JWT".to_string(),
        })?;
        let body = b64e_json(&claims(Some(NOW + 60)))?;
        let token = format!("{header}.{body}.");
        assert_eq!(codec().decode(&token), Err(DecodeError::MalformedToken));
        Ok(())
    }

    #[test]
    fn is_expired_fails_closed() -> Result<(), TokenError> {
        let codec = codec();
        let past = codec.encode(&claims(Some(NOW - 1)))?;
        let no_exp = codec.encode(&claims(None))?;
        assert!(codec.is_expired(&past, NOW));
        assert!(codec.is_expired(&no_exp, NOW));
        assert!(codec.is_expired("not.a.token", NOW));
        assert!(codec.is_expired("garbage", NOW));
        assert!(codec.is_expired("", NOW));
        Ok(())
    }

    #[test]
    fn unparsable_exp_is_expired() {
        let header = b64e_json(&TokenHeader::hs256()).unwrap_or_default();
        let body = Base64UrlUnpadded::encode_string(br#"{"sub":"1","exp":"soon"}"#);
        let token = format!("{header}.{body}.sig");
        assert!(TokenCodec::unverified().is_expired(&token, NOW));
    }

    #[test]
    fn unverified_codec_reads_claims_without_key() -> Result<(), TokenError> {
        let token = codec().encode(&claims(Some(NOW + 60)))?;
        let client = TokenCodec::unverified();
        let decoded = client.decode(&token).map_err(|_| TokenError::InvalidKey)?;
        assert_eq!(decoded.display_name, "alice");
        assert!(!client.is_expired(&token, NOW));
        assert!(client.encode(&decoded).is_err());
        Ok(())
    }
}
