//! HTTP-01 key authorization helpers.

#![allow(clippy::module_name_repetitions)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use thiserror::Error;

use crate::authorization::{Challenge, ChallengeKind};

/// Path prefix the CA fetches during HTTP-01 validation.
pub const HTTP01_PATH_PREFIX: &str = "/.well-known/acme-challenge/";

/// Errors raised while preparing an HTTP-01 response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Http01ValidationError {
    #[error("Challenge HTTP-01 türünde değil")]
    NotHttp01,
    #[error("HTTP-01 challenge token değeri eksik")]
    MissingToken,
    #[error("HTTP-01 challenge token değeri geçersiz: {0}")]
    InvalidToken(&'static str),
    #[error("HTTP-01 challenge thumbprint değeri geçersiz: {0}")]
    InvalidThumbprint(&'static str),
}

/// Token plus the `token.thumbprint` body the responder must serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http01KeyAuthorization {
    token: String,
    key_authorization: String,
}

impl Http01KeyAuthorization {
    /// # Errors
    ///
    /// Returns [`Http01ValidationError`] when the token is not a base64url string of at
    /// least 128 bits, or when the thumbprint is not a base64url SHA-256 digest.
    pub fn new(token: &str, account_thumbprint: &str) -> Result<Self, Http01ValidationError> {
        validate_token(token)?;
        let thumbprint = account_thumbprint.trim();
        let digest = URL_SAFE_NO_PAD
            .decode(thumbprint)
            .map_err(|_| Http01ValidationError::InvalidThumbprint("base64url değil"))?;
        if digest.len() != 32 {
            return Err(Http01ValidationError::InvalidThumbprint(
                "SHA-256 (32 bayt) uzunluğunda olmalı",
            ));
        }
        Ok(Self {
            token: token.to_owned(),
            key_authorization: format!("{token}.{thumbprint}"),
        })
    }

    /// # Errors
    ///
    /// Returns [`Http01ValidationError`] if the challenge is not HTTP-01, carries no
    /// token, or fails token/thumbprint validation.
    pub fn from_challenge(
        challenge: &Challenge,
        account_thumbprint: &str,
    ) -> Result<Self, Http01ValidationError> {
        if challenge.kind != ChallengeKind::Http01 {
            return Err(Http01ValidationError::NotHttp01);
        }
        let token = challenge
            .token
            .as_deref()
            .ok_or(Http01ValidationError::MissingToken)?;
        Self::new(token, account_thumbprint)
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn key_authorization(&self) -> &str {
        &self.key_authorization
    }

    /// Request path the CA will fetch.
    #[must_use]
    pub fn resource_path(&self) -> String {
        format!("{HTTP01_PATH_PREFIX}{}", self.token)
    }
}

fn validate_token(token: &str) -> Result<(), Http01ValidationError> {
    // RFC 8555 §8.3: at least 128 bits of entropy, base64url alphabet only.
    if token.len() < 22 {
        return Err(Http01ValidationError::InvalidToken("en az 22 karakter olmalı"));
    }
    if token.len() > 256 {
        return Err(Http01ValidationError::InvalidToken("çok uzun"));
    }
    if !token
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
    {
        return Err(Http01ValidationError::InvalidToken(
            "base64url alfabesi dışında karakter içeriyor",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const TOKEN: &str = "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA";
    const THUMBPRINT: &str = "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs";

    #[test]
    fn builds_key_authorization_and_path() {
        let auth = Http01KeyAuthorization::new(TOKEN, THUMBPRINT).expect("key authorization");
        assert_eq!(auth.key_authorization(), format!("{TOKEN}.{THUMBPRINT}"));
        assert_eq!(
            auth.resource_path(),
            format!("/.well-known/acme-challenge/{TOKEN}")
        );
    }

    #[test]
    fn rejects_path_traversal_and_short_tokens() {
        assert!(matches!(
            Http01KeyAuthorization::new("../../etc/passwd/aaaaaaaaaaaaaaaa", THUMBPRINT),
            Err(Http01ValidationError::InvalidToken(_))
        ));
        assert!(matches!(
            Http01KeyAuthorization::new("short", THUMBPRINT),
            Err(Http01ValidationError::InvalidToken(_))
        ));
        assert!(matches!(
            Http01KeyAuthorization::new(TOKEN, "AAAA"),
            Err(Http01ValidationError::InvalidThumbprint(_))
        ));
    }

    #[test]
    fn from_challenge_requires_http01_with_token() {
        let dns: Challenge = serde_json::from_value(json!({
            "type": "dns-01",
            "url": "https://ca.example/chall/1",
            "status": "pending",
            "token": TOKEN
        }))
        .expect("challenge");
        assert_eq!(
            Http01KeyAuthorization::from_challenge(&dns, THUMBPRINT),
            Err(Http01ValidationError::NotHttp01)
        );

        let tokenless: Challenge = serde_json::from_value(json!({
            "type": "http-01",
            "url": "https://ca.example/chall/2",
            "status": "pending"
        }))
        .expect("challenge");
        assert_eq!(
            Http01KeyAuthorization::from_challenge(&tokenless, THUMBPRINT),
            Err(Http01ValidationError::MissingToken)
        );
    }
}
