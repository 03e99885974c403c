use idna::domain_to_ascii;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountContactError {
    #[error("ACME hesap e-posta adresi geçersiz: {0}")]
    InvalidEmail(String),
}

/// `mailto:` URI'si olarak saklanan hesap iletişim adresi.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContact {
    uri: String,
}

impl AccountContact {
    /// E-posta adresini doğrular; alan adı kısmı IDNA ile ASCII'ye çevrilir.
    ///
    /// # Errors
    ///
    /// Adres tek bir `@` içermiyorsa, boşluk barındırıyorsa veya alan adı
    /// dönüştürülemiyorsa `AccountContactError::InvalidEmail` döner.
    pub fn email(address: &str) -> Result<Self, AccountContactError> {
        let trimmed = address.trim();
        let invalid = || AccountContactError::InvalidEmail(trimmed.to_owned());
        if trimmed.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let (local, domain) = trimmed.split_once('@').ok_or_else(invalid)?;
        if local.is_empty()
            || domain.is_empty()
            || domain.contains('@')
            || local.starts_with('.')
            || local.ends_with('.')
            || local.contains("..")
        {
            return Err(invalid());
        }
        let ascii_domain = domain_to_ascii(domain).map_err(|_| invalid())?;
        if ascii_domain.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            uri: format!("mailto:{local}@{ascii_domain}"),
        })
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Serialize for AccountContact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.uri)
    }
}

/// `newAccount` yükü (RFC 8555 §7.3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccountRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    contact: Vec<AccountContact>,
    #[serde(skip_serializing_if = "is_false")]
    terms_of_service_agreed: bool,
    #[serde(skip_serializing_if = "is_false")]
    only_return_existing: bool,
}

impl NewAccountRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contact(mut self, contact: AccountContact) -> Self {
        self.contact.push(contact);
        self
    }

    /// Kullanım koşullarının kabul edildiğini bildirir.
    #[must_use]
    pub const fn agree_to_terms(mut self) -> Self {
        self.terms_of_service_agreed = true;
        self
    }

    /// Hesap yoksa oluşturulmamasını ister; yalnızca mevcut hesap döner.
    #[must_use]
    pub const fn only_return_existing(mut self) -> Self {
        self.only_return_existing = true;
        self
    }

    #[must_use]
    pub fn contacts(&self) -> &[AccountContact] {
        &self.contact
    }

    #[must_use]
    pub const fn terms_of_service_agreed(&self) -> bool {
        self.terms_of_service_agreed
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// CA'nın döndürdüğü hesap nesnesi.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn email_contact_is_normalised_to_mailto() {
        let contact = AccountContact::email("  ops@bücher.example ").expect("geçerli adres");
        assert_eq!(contact.uri(), "mailto:ops@xn--bcher-kva.example");
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for value in ["", "no-at-sign", "a@b@c", "@example.com", "a b@example.com", ".a@x.y"] {
            assert!(
                AccountContact::email(value).is_err(),
                "{value} reddedilmeliydi"
            );
        }
    }

    #[test]
    fn new_account_payload_uses_acme_field_names() {
        let request = NewAccountRequest::new()
            .contact(AccountContact::email("x@y.z").expect("adres"))
            .agree_to_terms();
        assert_eq!(
            serde_json::to_value(&request).expect("json"),
            json!({"contact": ["mailto:x@y.z"], "termsOfServiceAgreed": true})
        );

        let lookup = NewAccountRequest::new().only_return_existing();
        assert_eq!(
            serde_json::to_value(&lookup).expect("json"),
            json!({"onlyReturnExisting": true})
        );
    }

    #[test]
    fn account_resource_parses_optional_fields() {
        let account: Account = serde_json::from_value(json!({
            "status": "valid",
            "contact": ["mailto:x@y.z"],
            "orders": "https://ca.example/acct/1/orders"
        }))
        .expect("hesap");
        assert_eq!(account.status, AccountStatus::Valid);
        assert_eq!(account.terms_of_service_agreed, None);
    }
}
