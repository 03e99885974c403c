use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::order::OrderIdentifier;
use crate::problem::Problem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// Challenge türü. Bilinmeyen türler olduğu gibi korunur.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChallengeKind {
    Http01,
    Dns01,
    TlsAlpn01,
    Other(String),
}

impl ChallengeKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for ChallengeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "http-01" => Self::Http01,
            "dns-01" => Self::Dns01,
            "tls-alpn-01" => Self::TlsAlpn01,
            _ => Self::Other(value),
        }
    }
}

impl From<ChallengeKind> for String {
    fn from(kind: ChallengeKind) -> Self {
        kind.as_str().to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: ChallengeKind,
    pub url: Url,
    pub status: ChallengeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub validated: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

/// Tek bir tanımlayıcının sahiplik kanıtı süreci (RFC 8555 §7.1.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: OrderIdentifier,
    pub status: AuthorizationStatus,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires: Option<OffsetDateTime>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub wildcard: bool,
}

impl Authorization {
    /// # Errors
    ///
    /// Gövde yetkilendirme şemasına uymuyorsa `serde_json::Error` döner.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// İlgili türdeki ilk challenge.
    #[must_use]
    pub fn challenge(&self, kind: &ChallengeKind) -> Option<&Challenge> {
        self.challenges.iter().find(|challenge| &challenge.kind == kind)
    }

    #[must_use]
    pub fn http01(&self) -> Option<&Challenge> {
        self.challenge(&ChallengeKind::Http01)
    }

    /// Başarısız challenge'ların hata gövdelerinden okunabilir bir neden üretir.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        self.challenges
            .iter()
            .find_map(|challenge| challenge.error.as_ref())
            .map_or_else(
                || format!("yetkilendirme durumu: {}", self.status),
                ToString::to_string,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "status": "pending",
            "expires": "2026-10-26T12:00:00Z",
            "identifier": {"type": "dns", "value": "a.test"},
            "challenges": [
                {
                    "type": "dns-01",
                    "url": "https://ca.example/chall/dns",
                    "status": "pending",
                    "token": "DGyRejmCefe7v4NfDGDKfA"
                },
                {
                    "type": "http-01",
                    "url": "https://ca.example/chall/http",
                    "status": "pending",
                    "token": "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA"
                },
                {
                    "type": "onion-csr-01",
                    "url": "https://ca.example/chall/onion",
                    "status": "pending"
                }
            ]
        })
    }

    #[test]
    fn selects_http01_challenge() {
        let authorization: Authorization = serde_json::from_value(sample()).expect("authz");
        let challenge = authorization.http01().expect("http-01 mevcut");
        assert_eq!(challenge.url.as_str(), "https://ca.example/chall/http");
        assert_eq!(
            challenge.token.as_deref(),
            Some("evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA")
        );
        assert_eq!(
            authorization.challenges[2].kind,
            ChallengeKind::Other("onion-csr-01".to_owned())
        );
        assert!(authorization.status.is_pending());
    }

    #[test]
    fn failure_reason_prefers_challenge_problem() {
        let mut value = sample();
        value["status"] = json!("invalid");
        value["challenges"][1]["status"] = json!("invalid");
        value["challenges"][1]["error"] = json!({
            "type": "urn:ietf:params:acme:error:connection",
            "detail": "Fetching http://a.test/.well-known/acme-challenge/x: Timeout"
        });
        let authorization: Authorization = serde_json::from_value(value).expect("authz");
        assert_eq!(
            authorization.failure_reason(),
            "connection: Fetching http://a.test/.well-known/acme-challenge/x: Timeout"
        );

        let mut bare = sample();
        bare["status"] = json!("expired");
        let authorization: Authorization = serde_json::from_value(bare).expect("authz");
        assert_eq!(authorization.failure_reason(), "yetkilendirme durumu: expired");
    }
}
