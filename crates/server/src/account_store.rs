//! ACME hesap kimliğinin yapılandırmadan yüklenmesi.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use url::Url;
use zeroize::Zeroizing;

use autocert_acme::{AccountKey, JwsError};

/// Kayıt bilgisinin saklandığı gizli alan adı.
pub const REGISTRATION_FIELD: &str = "registration";

#[derive(Debug, Error)]
pub enum AccountStoreError {
    #[error("LETS_ENCRYPT_USER_CERT tanımlı değil; hesap anahtarı zorunludur")]
    MissingKey,
    #[error("hesap anahtarı okunamadı: {0}")]
    InvalidKey(#[from] JwsError),
}

/// CA'nın verdiği hesap kaydı.
///
/// Yalnızca onu üreten anahtarla birlikte geçerlidir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub uri: Url,
    #[serde(default)]
    pub terms_of_service: Option<Url>,
    #[serde(default)]
    pub body: Value,
}

impl Registration {
    /// Önbellekteki kaydı çözer; şemaya uymayan değer yok sayılır.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(raw) {
            Ok(registration) => Some(registration),
            Err(err) => {
                warn!(error = %err, "önbellekteki kayıt çözülemedi, yeniden kayıt yapılacak");
                None
            }
        }
    }

    /// # Errors
    ///
    /// Serileştirme başarısız olursa `serde_json::Error` döner.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Bir çalıştırma boyunca kullanılan hesap: e-posta, anahtar ve varsa kayıt.
#[derive(Debug, Clone)]
pub struct AccountCredential {
    email: String,
    key: AccountKey,
    registration: Option<Registration>,
}

impl AccountCredential {
    #[must_use]
    pub const fn new(email: String, key: AccountKey, registration: Option<Registration>) -> Self {
        Self {
            email,
            key,
            registration,
        }
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub const fn key(&self) -> &AccountKey {
        &self.key
    }

    #[must_use]
    pub const fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    pub(crate) fn attach_registration(&mut self, registration: Registration) {
        self.registration = Some(registration);
    }
}

/// Hesabı yapılandırma değerlerinden türetir. Anahtarı hiçbir yere yazmaz.
pub struct AccountStore {
    email: String,
    key_pem: Option<Zeroizing<String>>,
    cached_registration: Option<String>,
}

impl AccountStore {
    #[must_use]
    pub const fn new(
        email: String,
        key_pem: Option<Zeroizing<String>>,
        cached_registration: Option<String>,
    ) -> Self {
        Self {
            email,
            key_pem,
            cached_registration,
        }
    }

    /// # Errors
    ///
    /// Anahtar tanımlı değilse veya PEM okunamazsa `AccountStoreError` döner.
    pub fn load(&self) -> Result<AccountCredential, AccountStoreError> {
        let pem = self.key_pem.as_ref().ok_or(AccountStoreError::MissingKey)?;
        let key = AccountKey::from_pem(pem)?;
        let registration = self
            .cached_registration
            .as_deref()
            .and_then(Registration::decode);
        Ok(AccountCredential::new(self.email.clone(), key, registration))
    }
}
