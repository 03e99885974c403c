//! Tek seferde bir sertifika üretimi: kayıt → alma → gizli depoya yazma.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::account_store::{AccountCredential, Registration};
use crate::acquirer::{AcquireError, Acquirer, CredentialBundle};
use crate::archive::CertificateArchive;
use crate::config::ServerConfig;
use crate::registrar::{Registrar, RegistrarError};
use crate::retry::Retryable;
use crate::secret_store::{SecretFields, SecretStore, StoreError};

/// Bir üretim çalıştırmasının girdileri.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    domains: Vec<String>,
    email: String,
    secret_name: String,
}

impl ProvisioningRequest {
    /// Virgülle ayrılmış alan adı listesini ayrıştırır.
    ///
    /// Boş girdiler atılır, tekrarlar (büyük/küçük harf duyarsız) ilk
    /// yazılışıyla bir kez tutulur.
    #[must_use]
    pub fn new(domains: &str, email: impl Into<String>, secret_name: impl Into<String>) -> Self {
        let mut seen = HashSet::new();
        let domains = domains
            .split(',')
            .map(str::trim)
            .filter(|domain| !domain.is_empty())
            .filter(|domain| seen.insert(domain.to_ascii_lowercase()))
            .map(str::to_string)
            .collect();
        Self {
            domains,
            email: email.into().trim().to_string(),
            secret_name: secret_name.into().trim().to_string(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(&config.domains, config.email.as_str(), config.secret_name.as_str())
    }

    #[must_use]
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    /// # Errors
    ///
    /// Alanlardan biri boşsa `ProvisioningError::InvalidRequest` döner.
    pub fn validate(&self) -> Result<(), ProvisioningError> {
        if self.domains.is_empty() {
            return Err(ProvisioningError::InvalidRequest(
                "DOMAINS boş; en az bir alan adı gerekli".to_string(),
            ));
        }
        if self.email.is_empty() {
            return Err(ProvisioningError::InvalidRequest("EMAIL boş".to_string()));
        }
        if self.secret_name.is_empty() {
            return Err(ProvisioningError::InvalidRequest("SECRET_NAME boş".to_string()));
        }
        Ok(())
    }
}

/// Başarılı bir çalıştırmanın özeti.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningReport {
    /// Birincil alan adı (istekteki ilk ad).
    pub domain: String,
    /// Sertifikanın kapsadığı tüm alan adları.
    pub domains: Vec<String>,
    /// Yazılan gizli nesnenin adı.
    pub secret_name: String,
    /// Gizli nesneye yazılan alan adları, sıralı.
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Registrar,
    Acquirer,
    SecretStore,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registrar => "registrar",
            Self::Acquirer => "acquirer",
            Self::SecretStore => "secret_store",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bir aşamanın kendi hatası.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Registrar(#[from] RegistrarError),
    #[error(transparent)]
    Acquirer(#[from] AcquireError),
    #[error(transparent)]
    SecretStore(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Alan adı, e-posta veya gizli nesne adı eksik; ağ çağrısı yapılmaz.
    #[error("geçersiz istek: {0}")]
    InvalidRequest(String),
    /// Başka bir çalıştırma sürüyor.
    #[error("sertifika üretimi zaten sürüyor")]
    Busy,
    /// Adı verilen aşama kendi hatasıyla başarısız oldu.
    #[error("{stage} aşaması başarısız: {cause}")]
    Stage {
        stage: Stage,
        #[source]
        cause: StageFailure,
    },
}

impl ProvisioningError {
    fn stage(stage: Stage, cause: impl Into<StageFailure>) -> Self {
        Self::Stage {
            stage,
            cause: cause.into(),
        }
    }
}

/// Geçersiz istekler ve gizli depo hataları döngüyü bitirir: yetkisiz bir
/// servis hesabı beklemeyle düzelmez, her deneme ise CA'dan yeni bir
/// sertifika ister.
impl Retryable for ProvisioningError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidRequest(_)
                | Self::Stage {
                    stage: Stage::SecretStore,
                    ..
                }
        )
    }
}

/// Bayrak bırakılana kadar çalıştırmanın sahibi.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Bir paketin gizli nesne alanlarına açılımı.
///
/// Her alan adı için `d.crt`, `d.key`, `d.pem`, `d.json` ve `d.issuer.crt`
/// üretilir. CA yalnızca yaprak sertifika döndürdüyse `d.issuer.crt` boştur.
#[must_use]
pub fn field_mapping(bundle: &CredentialBundle) -> SecretFields {
    let issuer = bundle.issuer_certificate_pem.as_deref().unwrap_or_default();
    let mut fields = SecretFields::new();
    for domain in &bundle.domains {
        fields.insert(
            format!("{domain}.crt"),
            bundle.certificate_pem.as_bytes().to_vec(),
        );
        fields.insert(
            format!("{domain}.key"),
            bundle.private_key_pem.as_bytes().to_vec(),
        );
        fields.insert(
            format!("{domain}.pem"),
            bundle.combined_pem.as_bytes().to_vec(),
        );
        fields.insert(
            format!("{domain}.json"),
            bundle.metadata_json.as_bytes().to_vec(),
        );
        fields.insert(format!("{domain}.issuer.crt"), issuer.as_bytes().to_vec());
    }
    fields
}

/// Çalıştırmaları sıraya sokmadan tekilleştirir: ikinci istek `Busy` alır.
pub struct Coordinator {
    registrar: Registrar,
    acquirer: Acquirer,
    store: Arc<dyn SecretStore>,
    credential: Mutex<AccountCredential>,
    archive: Option<CertificateArchive>,
    in_progress: AtomicBool,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        registrar: Registrar,
        acquirer: Acquirer,
        store: Arc<dyn SecretStore>,
        credential: AccountCredential,
    ) -> Self {
        Self {
            registrar,
            acquirer,
            store,
            credential: Mutex::new(credential),
            archive: None,
            in_progress: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_archive(mut self, archive: CertificateArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Hesabın kayıtlı olmasını sağlar. Çalışan bir üretimi beklemez.
    ///
    /// # Errors
    ///
    /// Üretim ya da başka bir kayıt sürüyorsa `Busy`, kayıt başarısız olursa
    /// `Registrar` aşamalı `Stage` döner.
    pub async fn ensure_registered(&self) -> Result<Registration, ProvisioningError> {
        if self.is_busy() {
            return Err(ProvisioningError::Busy);
        }
        let mut credential = self
            .credential
            .try_lock()
            .map_err(|_| ProvisioningError::Busy)?;
        self.registrar
            .ensure_registered(&mut credential)
            .await
            .map_err(|err| ProvisioningError::stage(Stage::Registrar, err))
    }

    /// Tek bir üretim çalıştırması yürütür.
    ///
    /// Başarısızlıkta gizli nesneye hiçbir sertifika alanı yazılmamış olur.
    ///
    /// # Errors
    ///
    /// İstek geçersizse `InvalidRequest`, başka bir çalıştırma sürüyorsa
    /// `Busy`, aşamalardan biri başarısız olursa `Stage` döner.
    pub async fn run_provisioning(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningReport, ProvisioningError> {
        request.validate()?;
        let _guard = RunGuard::try_acquire(&self.in_progress).ok_or(ProvisioningError::Busy)?;
        info!(domains = ?request.domains(), secret = request.secret_name(), "sertifika üretimi başladı");

        let bundle = {
            let mut credential = self.credential.lock().await;
            self.registrar
                .ensure_registered(&mut credential)
                .await
                .map_err(|err| ProvisioningError::stage(Stage::Registrar, err))?;
            self.acquirer
                .acquire(request.domains(), &credential)
                .await
                .map_err(|err| ProvisioningError::stage(Stage::Acquirer, err))?
        };

        let fields = field_mapping(&bundle);
        self.store
            .merge_update(request.secret_name(), &fields)
            .await
            .map_err(|err| ProvisioningError::stage(Stage::SecretStore, err))?;
        info!(
            domain = %bundle.domain,
            secret = request.secret_name(),
            fields = fields.len(),
            "sertifika gizli nesneye yazıldı"
        );

        if let Some(archive) = &self.archive {
            if let Err(err) = archive.mirror(&bundle).await {
                warn!(dir = %archive.dir().display(), error = %err, "sertifika diske kopyalanamadı");
            }
        }

        Ok(ProvisioningReport {
            domain: bundle.domain.clone(),
            domains: bundle.domains.clone(),
            secret_name: request.secret_name().to_string(),
            fields: fields.into_keys().collect(),
        })
    }
}
