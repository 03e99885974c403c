//! ACME hesap kaydı ve kaydın gizli depoya yazılması.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use autocert_acme::{AccountContact, AccountContactError, NewAccountRequest, Problem};

use crate::account_store::{AccountCredential, Registration, REGISTRATION_FIELD};
use crate::authority::{CaError, CertificateAuthority};
use crate::secret_store::{SecretFields, SecretStore, StoreError};

#[derive(Debug, Error)]
pub enum RegistrarError {
    /// CA'ya ulaşılamadı veya 5xx döndü.
    #[error("CA erişilemez: {0}")]
    CaUnavailable(String),
    /// CA yanıtı beklenen biçimde değil.
    #[error("CA yanıtı anlaşılamadı: {0}")]
    MalformedResponse(String),
    /// CA newAccount isteğini bir problem belgesiyle reddetti.
    #[error("CA kaydı reddetti: {0}")]
    Rejected(Problem),
    /// E-posta adresi `mailto:` iletişimine çevrilemedi.
    #[error("iletişim adresi geçersiz: {0}")]
    InvalidContact(#[from] AccountContactError),
    /// Kayıt yapıldı ama gizli nesneye yazılamadı.
    #[error("kayıt gizli depoya yazılamadı: {0}")]
    PersistFailed(#[from] StoreError),
}

impl From<CaError> for RegistrarError {
    fn from(err: CaError) -> Self {
        match err {
            CaError::Unavailable(reason) => Self::CaUnavailable(reason),
            CaError::Malformed(reason) => Self::MalformedResponse(reason),
            CaError::Rejected(problem) => Self::Rejected(problem),
        }
    }
}

/// Hesabın CA'da kayıtlı olmasını sağlar.
pub struct Registrar {
    authority: Arc<dyn CertificateAuthority>,
    store: Arc<dyn SecretStore>,
    account_secret: String,
}

impl Registrar {
    #[must_use]
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        store: Arc<dyn SecretStore>,
        account_secret: impl Into<String>,
    ) -> Self {
        Self {
            authority,
            store,
            account_secret: account_secret.into(),
        }
    }

    /// Önbellekte kayıt varsa onu döner; yoksa kayıt olur, kaydı yazar ve
    /// kimliğe ekler.
    ///
    /// # Errors
    ///
    /// CA çağrısı veya kalıcılaştırma başarısız olursa `RegistrarError` döner.
    /// Bu durumda kimlik değişmez.
    pub async fn ensure_registered(
        &self,
        credential: &mut AccountCredential,
    ) -> Result<Registration, RegistrarError> {
        if let Some(registration) = credential.registration() {
            debug!(account = %registration.uri, "önbellekteki kayıt kullanılıyor");
            return Ok(registration.clone());
        }

        let request = NewAccountRequest::new()
            .contact(AccountContact::email(credential.email())?)
            .agree_to_terms();
        let account = self.authority.register(credential.key(), &request).await?;
        let registration = Registration {
            uri: account.url,
            terms_of_service: account.terms_of_service,
            body: account.body,
        };

        let encoded = registration
            .to_json()
            .map_err(|err| RegistrarError::MalformedResponse(err.to_string()))?;
        let mut fields = SecretFields::new();
        fields.insert(REGISTRATION_FIELD.to_string(), encoded);
        self.store.merge_update(&self.account_secret, &fields).await?;

        info!(
            account = %registration.uri,
            secret = %self.account_secret,
            "ACME hesabı kaydedildi"
        );
        credential.attach_registration(registration.clone());
        Ok(registration)
    }
}
