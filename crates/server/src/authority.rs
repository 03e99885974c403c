//! Kayıt ve sertifika alma akışlarının CA ile konuştuğu sınır.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;
use url::Url;

use autocert_acme::{
    AccountKey, AcmeClient, AcmeClientError, Authorization, NewAccountRequest, NewOrderRequest,
    Order, OrderHandle, Problem,
};

#[derive(Debug, Clone, Error)]
pub enum CaError {
    /// Taşıma hatası veya 5xx yanıtı.
    #[error("CA erişilemez: {0}")]
    Unavailable(String),
    #[error("CA yanıtı anlaşılamadı: {0}")]
    Malformed(String),
    /// CA isteği bir ACME hata gövdesiyle reddetti.
    #[error("CA isteği reddetti: {0}")]
    Rejected(Problem),
}

impl From<AcmeClientError> for CaError {
    fn from(err: AcmeClientError) -> Self {
        match err {
            AcmeClientError::Transport(err) => Self::Unavailable(err.to_string()),
            AcmeClientError::Problem { status, problem } if status >= 500 => {
                Self::Unavailable(format!("HTTP {status}: {problem}"))
            }
            AcmeClientError::Problem { problem, .. } => Self::Rejected(problem),
            other => Self::Malformed(other.to_string()),
        }
    }
}

/// Kayıtlı bir hesabın imza anahtarı ve URL'si.
#[derive(Debug, Clone, Copy)]
pub struct AccountContext<'a> {
    pub key: &'a AccountKey,
    pub url: &'a Url,
}

/// `newAccount` sonucu.
#[derive(Debug, Clone)]
pub struct RegisteredAccount {
    pub url: Url,
    pub terms_of_service: Option<Url>,
    pub body: Value,
}

/// Kayıt ve sertifika alma için gereken ACME adımları.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn register(
        &self,
        key: &AccountKey,
        request: &NewAccountRequest,
    ) -> Result<RegisteredAccount, CaError>;

    /// Kullanım koşullarını mevcut anahtar için yeniden kabul eder.
    async fn agree_to_terms(&self, key: &AccountKey) -> Result<(), CaError>;

    async fn new_order(
        &self,
        account: AccountContext<'_>,
        request: &NewOrderRequest,
    ) -> Result<OrderHandle, CaError>;

    async fn authorization(
        &self,
        account: AccountContext<'_>,
        url: &Url,
    ) -> Result<Authorization, CaError>;

    async fn respond_to_challenge(
        &self,
        account: AccountContext<'_>,
        url: &Url,
    ) -> Result<(), CaError>;

    async fn order(&self, account: AccountContext<'_>, url: &Url) -> Result<Order, CaError>;

    async fn finalize(
        &self,
        account: AccountContext<'_>,
        url: &Url,
        csr_der: &[u8],
    ) -> Result<Order, CaError>;

    async fn download_certificate(
        &self,
        account: AccountContext<'_>,
        url: &Url,
    ) -> Result<String, CaError>;
}

/// `AcmeClient` üzerinden gerçek CA. Directory ilk kullanımda indirilir.
pub struct AcmeAuthority {
    http: reqwest::Client,
    directory_url: Url,
    client: OnceCell<AcmeClient>,
}

impl AcmeAuthority {
    #[must_use]
    pub fn new(http: reqwest::Client, directory_url: Url) -> Self {
        Self {
            http,
            directory_url,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&AcmeClient, CaError> {
        self.client
            .get_or_try_init(|| async {
                info!(directory = %self.directory_url, "ACME directory indiriliyor");
                AcmeClient::connect(self.http.clone(), &self.directory_url)
                    .await
                    .map_err(CaError::from)
            })
            .await
    }
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn register(
        &self,
        key: &AccountKey,
        request: &NewAccountRequest,
    ) -> Result<RegisteredAccount, CaError> {
        let client = self.client().await?;
        let handle = client.new_account(key, request).await?;
        let body = serde_json::to_value(&handle.account)
            .map_err(|err| CaError::Malformed(err.to_string()))?;
        Ok(RegisteredAccount {
            url: handle.url,
            terms_of_service: client.directory().terms_of_service().cloned(),
            body,
        })
    }

    async fn agree_to_terms(&self, key: &AccountKey) -> Result<(), CaError> {
        let request = NewAccountRequest::new().agree_to_terms();
        self.client().await?.new_account(key, &request).await?;
        Ok(())
    }

    async fn new_order(
        &self,
        account: AccountContext<'_>,
        request: &NewOrderRequest,
    ) -> Result<OrderHandle, CaError> {
        Ok(self
            .client()
            .await?
            .new_order(account.key, account.url, request)
            .await?)
    }

    async fn authorization(
        &self,
        account: AccountContext<'_>,
        url: &Url,
    ) -> Result<Authorization, CaError> {
        Ok(self
            .client()
            .await?
            .authorization(account.key, account.url, url)
            .await?)
    }

    async fn respond_to_challenge(
        &self,
        account: AccountContext<'_>,
        url: &Url,
    ) -> Result<(), CaError> {
        self.client()
            .await?
            .respond_to_challenge(account.key, account.url, url)
            .await?;
        Ok(())
    }

    async fn order(&self, account: AccountContext<'_>, url: &Url) -> Result<Order, CaError> {
        Ok(self
            .client()
            .await?
            .order(account.key, account.url, url)
            .await?)
    }

    async fn finalize(
        &self,
        account: AccountContext<'_>,
        url: &Url,
        csr_der: &[u8],
    ) -> Result<Order, CaError> {
        Ok(self
            .client()
            .await?
            .finalize(account.key, account.url, url, csr_der)
            .await?)
    }

    async fn download_certificate(
        &self,
        account: AccountContext<'_>,
        url: &Url,
    ) -> Result<String, CaError> {
        Ok(self
            .client()
            .await?
            .download_certificate(account.key, account.url, url)
            .await?)
    }
}
