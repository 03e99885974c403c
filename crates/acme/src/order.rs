use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;

use crate::problem::Problem;

#[derive(Debug, Error)]
pub enum OrderIdentifierError {
    #[error("ACME DNS identifier değeri boş olamaz")]
    EmptyDns,
    #[error("ACME DNS identifier değeri geçersiz: {0}")]
    InvalidDns(String),
}

/// Siparişteki tek bir tanımlayıcı; bu sistem yalnızca `dns` türü üretir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl OrderIdentifier {
    /// DNS adını küçük harfe çevirir, sondaki noktayı atar ve etiketleri denetler.
    ///
    /// Joker karakter yalnızca ilk etiket olarak kabul edilir.
    ///
    /// # Errors
    ///
    /// Ad boşsa, 253 karakteri aşıyorsa ya da etiket kurallarına uymuyorsa
    /// `OrderIdentifierError` döner.
    pub fn dns(name: &str) -> Result<Self, OrderIdentifierError> {
        let trimmed = name.trim().trim_end_matches('.');
        if trimmed.is_empty() {
            return Err(OrderIdentifierError::EmptyDns);
        }
        let normalized = trimmed.to_ascii_lowercase();
        let invalid = || OrderIdentifierError::InvalidDns(name.trim().to_owned());
        if normalized.len() > 253 {
            return Err(invalid());
        }
        for (index, label) in normalized.split('.').enumerate() {
            if label == "*" && index == 0 {
                continue;
            }
            let well_formed = !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
            if !well_formed {
                return Err(invalid());
            }
        }
        Ok(Self {
            kind: "dns".to_owned(),
            value: normalized,
        })
    }
}

impl fmt::Display for OrderIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[derive(Debug, Error)]
pub enum NewOrderError {
    #[error("ACME newOrder isteği en az bir identifier içermelidir")]
    MissingIdentifier,
    #[error(transparent)]
    Identifier(#[from] OrderIdentifierError),
}

/// `newOrder` yükü (RFC 8555 §7.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrderRequest {
    identifiers: Vec<OrderIdentifier>,
}

impl NewOrderRequest {
    /// Alan adlarının tamamı için tek bir sipariş yükü üretir.
    ///
    /// # Errors
    ///
    /// Liste boşsa veya adlardan biri geçersizse `NewOrderError` döner.
    pub fn for_dns_names<I, S>(names: I) -> Result<Self, NewOrderError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let identifiers = names
            .into_iter()
            .map(|name| OrderIdentifier::dns(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if identifiers.is_empty() {
            return Err(NewOrderError::MissingIdentifier);
        }
        Ok(Self { identifiers })
    }

    #[must_use]
    pub fn identifiers(&self) -> &[OrderIdentifier] {
        &self.identifiers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    /// Siparişin artık değişmeyeceği durumlar.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        })
    }
}

/// CA'nın döndürdüğü sipariş nesnesi.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub status: OrderStatus,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires: Option<OffsetDateTime>,
    pub identifiers: Vec<OrderIdentifier>,
    pub authorizations: Vec<Url>,
    pub finalize: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

impl Order {
    /// # Errors
    ///
    /// Gövde sipariş şemasına uymuyorsa `serde_json::Error` döner.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Siparişteki alan adları, CA'nın döndürdüğü sırayla.
    #[must_use]
    pub fn domains(&self) -> Vec<String> {
        self.identifiers
            .iter()
            .map(|identifier| identifier.value.clone())
            .collect()
    }
}
