use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum AcmeDirectoryError {
    #[error("directory belgesi JSON olarak ayrıştırılamadı: {0}")]
    Json(#[from] serde_json::Error),
    #[error("directory belgesi bir JSON objesi olmalı")]
    NotAnObject,
    #[error("directory belgesinde `{0}` alanı yok")]
    MissingField(&'static str),
    #[error("`{field}` alanı geçerli bir URL değil: {source}")]
    InvalidUrl {
        field: String,
        #[source]
        source: url::ParseError,
    },
    #[error("`{0}` alanı beklenen türde değil")]
    InvalidType(String),
}

/// CA'nın yayınladığı uç nokta haritası (RFC 8555 §7.1.1).
///
/// Yalnızca hesap, nonce ve sipariş akışının ihtiyaç duyduğu uç noktalar
/// zorunludur; iptal ve anahtar değişimi bilgi amaçlı tutulur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeDirectory {
    pub new_nonce: Url,
    pub new_account: Url,
    pub new_order: Url,
    pub revoke_cert: Option<Url>,
    pub key_change: Option<Url>,
    pub meta: AcmeDirectoryMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcmeDirectoryMeta {
    pub terms_of_service: Option<Url>,
    pub website: Option<Url>,
    pub caa_identities: Vec<String>,
    pub external_account_required: bool,
}

impl AcmeDirectory {
    /// Ham HTTP gövdesinden directory belgesini ayrıştırır.
    ///
    /// # Errors
    ///
    /// Gövde JSON değilse, zorunlu uç noktalar eksikse veya URL'ler
    /// ayrıştırılamıyorsa `AcmeDirectoryError` döner.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, AcmeDirectoryError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_json_value(&value)
    }

    /// # Errors
    ///
    /// Değer bir JSON objesi değilse veya şemaya uymuyorsa `AcmeDirectoryError` döner.
    pub fn from_json_value(value: &Value) -> Result<Self, AcmeDirectoryError> {
        let object = value.as_object().ok_or(AcmeDirectoryError::NotAnObject)?;
        Ok(Self {
            new_nonce: required_url(object, "newNonce")?,
            new_account: required_url(object, "newAccount")?,
            new_order: required_url(object, "newOrder")?,
            revoke_cert: optional_url(object, "revokeCert", "revokeCert")?,
            key_change: optional_url(object, "keyChange", "keyChange")?,
            meta: parse_meta(object)?,
        })
    }

    /// CA'nın kullanım koşulları bağlantısı.
    #[must_use]
    pub const fn terms_of_service(&self) -> Option<&Url> {
        self.meta.terms_of_service.as_ref()
    }
}

fn required_url(
    object: &Map<String, Value>,
    key: &'static str,
) -> Result<Url, AcmeDirectoryError> {
    optional_url(object, key, key)?.ok_or(AcmeDirectoryError::MissingField(key))
}

fn optional_url(
    object: &Map<String, Value>,
    key: &str,
    label: &str,
) -> Result<Option<Url>, AcmeDirectoryError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => {
            Url::parse(raw)
                .map(Some)
                .map_err(|source| AcmeDirectoryError::InvalidUrl {
                    field: label.to_owned(),
                    source,
                })
        }
        Some(_) => Err(AcmeDirectoryError::InvalidType(label.to_owned())),
    }
}

fn parse_meta(object: &Map<String, Value>) -> Result<AcmeDirectoryMeta, AcmeDirectoryError> {
    let meta = match object.get("meta") {
        None | Some(Value::Null) => return Ok(AcmeDirectoryMeta::default()),
        Some(Value::Object(meta)) => meta,
        Some(_) => return Err(AcmeDirectoryError::InvalidType("meta".to_owned())),
    };

    let caa_identities = match meta.get("caaIdentities") {
        None => Vec::new(),
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        Some(_) => {
            return Err(AcmeDirectoryError::InvalidType(
                "meta.caaIdentities".to_owned(),
            ))
        }
    };
    let external_account_required = match meta.get("externalAccountRequired") {
        None => false,
        Some(Value::Bool(flag)) => *flag,
        Some(_) => {
            return Err(AcmeDirectoryError::InvalidType(
                "meta.externalAccountRequired".to_owned(),
            ))
        }
    };

    Ok(AcmeDirectoryMeta {
        terms_of_service: optional_url(meta, "termsOfService", "meta.termsOfService")?,
        website: optional_url(meta, "website", "meta.website")?,
        caa_identities,
        external_account_required,
    })
}
