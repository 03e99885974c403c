//! Async ACME transport: nonce bookkeeping, JWS signing and resource decoding.

use std::sync::{Mutex, PoisonError};

use http::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::account::{Account, NewAccountRequest};
use crate::authorization::{Authorization, Challenge};
use crate::certificates::build_finalize_payload;
use crate::directory::{AcmeDirectory, AcmeDirectoryError};
use crate::jws::{AccountKey, JwsError, KeyBinding};
use crate::nonce::{NonceError, NoncePool, ReplayNonce};
use crate::order::{NewOrderRequest, Order};
use crate::problem::Problem;

const JOSE_CONTENT_TYPE: &str = "application/jose+json";
const PEM_CHAIN_CONTENT_TYPE: &str = "application/pem-certificate-chain";
const BAD_NONCE_ATTEMPTS: usize = 2;

#[derive(Debug, Error)]
pub enum AcmeClientError {
    #[error("CA'ya ulaşılamadı: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("CA {status} döndürdü: {problem}")]
    Problem { status: u16, problem: Problem },
    #[error("CA yanıtı çözümlenemedi: {0}")]
    Malformed(String),
    #[error(transparent)]
    Directory(#[from] AcmeDirectoryError),
    #[error(transparent)]
    Jws(#[from] JwsError),
    #[error(transparent)]
    Nonce(#[from] NonceError),
}

impl AcmeClientError {
    /// CA'nın gönderdiği hata gövdesi, varsa.
    #[must_use]
    pub const fn problem(&self) -> Option<&Problem> {
        match self {
            Self::Problem { problem, .. } => Some(problem),
            _ => None,
        }
    }

    /// Geçici olabilecek hatalar: taşıma hataları ve 5xx yanıtları.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Problem { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// `newAccount` sonucu: hesap URL'si (`kid`) ve hesap nesnesi.
#[derive(Debug, Clone)]
pub struct AccountHandle {
    pub url: Url,
    pub account: Account,
    /// CA yeni bir hesap oluşturduysa `true` (201), mevcut hesabı döndürdüyse `false`.
    pub created: bool,
}

/// Sipariş nesnesi ve onun kalıcı URL'si.
#[derive(Debug, Clone)]
pub struct OrderHandle {
    pub url: Url,
    pub order: Order,
}

struct SignedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl SignedResponse {
    fn location(&self) -> Result<Url, AcmeClientError> {
        let raw = self
            .headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AcmeClientError::Malformed("Location başlığı eksik".to_owned()))?;
        Url::parse(raw)
            .map_err(|err| AcmeClientError::Malformed(format!("Location URL'si geçersiz: {err}")))
    }

    fn json<T: DeserializeOwned>(&self, what: &str) -> Result<T, AcmeClientError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| AcmeClientError::Malformed(format!("{what} gövdesi: {err}")))
    }
}

/// Tek bir CA dizinine bağlı ACME istemcisi.
pub struct AcmeClient {
    http: reqwest::Client,
    directory: AcmeDirectory,
    nonces: Mutex<NoncePool>,
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("new_account", &self.directory.new_account.as_str())
            .finish_non_exhaustive()
    }
}

impl AcmeClient {
    /// Directory belgesini indirip istemciyi hazırlar.
    ///
    /// # Errors
    ///
    /// CA'ya ulaşılamazsa veya directory belgesi geçersizse `AcmeClientError` döner.
    pub async fn connect(
        http: reqwest::Client,
        directory_url: &Url,
    ) -> Result<Self, AcmeClientError> {
        let response = http.get(directory_url.clone()).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(problem_from(status, &body));
        }
        let directory = AcmeDirectory::from_json_slice(&body)?;
        debug!(directory = %directory_url, "ACME directory alındı");
        Ok(Self::with_directory(http, directory))
    }

    #[must_use]
    pub fn with_directory(http: reqwest::Client, directory: AcmeDirectory) -> Self {
        Self {
            http,
            directory,
            nonces: Mutex::new(NoncePool::default()),
        }
    }

    #[must_use]
    pub const fn directory(&self) -> &AcmeDirectory {
        &self.directory
    }

    /// Hesabı oluşturur ya da anahtara bağlı mevcut hesabı döndürür.
    ///
    /// # Errors
    ///
    /// CA isteği reddederse veya yanıt çözümlenemezse `AcmeClientError` döner.
    pub async fn new_account(
        &self,
        key: &AccountKey,
        request: &NewAccountRequest,
    ) -> Result<AccountHandle, AcmeClientError> {
        let url = self.directory.new_account.clone();
        let payload = serde_json::to_vec(request).map_err(JwsError::from)?;
        let response = self.post(key, KeyBinding::Jwk, &url, Some(&payload)).await?;
        Ok(AccountHandle {
            url: response.location()?,
            account: response.json("hesap")?,
            created: response.status == StatusCode::CREATED,
        })
    }

    /// # Errors
    ///
    /// CA siparişi reddederse veya yanıt çözümlenemezse `AcmeClientError` döner.
    pub async fn new_order(
        &self,
        key: &AccountKey,
        account_url: &Url,
        request: &NewOrderRequest,
    ) -> Result<OrderHandle, AcmeClientError> {
        let url = self.directory.new_order.clone();
        let response = self.post_json(key, account_url, &url, request).await?;
        Ok(OrderHandle {
            url: response.location()?,
            order: response.json("sipariş")?,
        })
    }

    /// # Errors
    ///
    /// İstek başarısız olursa veya yanıt çözümlenemezse `AcmeClientError` döner.
    pub async fn order(
        &self,
        key: &AccountKey,
        account_url: &Url,
        order_url: &Url,
    ) -> Result<Order, AcmeClientError> {
        self.post_as_get(key, account_url, order_url)
            .await?
            .json("sipariş")
    }

    /// # Errors
    ///
    /// İstek başarısız olursa veya yanıt çözümlenemezse `AcmeClientError` döner.
    pub async fn authorization(
        &self,
        key: &AccountKey,
        account_url: &Url,
        url: &Url,
    ) -> Result<Authorization, AcmeClientError> {
        self.post_as_get(key, account_url, url)
            .await?
            .json("yetkilendirme")
    }

    /// Challenge'ın doğrulanmaya hazır olduğunu bildirir (boş JSON nesnesi gönderir).
    ///
    /// # Errors
    ///
    /// İstek başarısız olursa veya yanıt çözümlenemezse `AcmeClientError` döner.
    pub async fn respond_to_challenge(
        &self,
        key: &AccountKey,
        account_url: &Url,
        challenge_url: &Url,
    ) -> Result<Challenge, AcmeClientError> {
        self.post_json(key, account_url, challenge_url, &serde_json::json!({}))
            .await?
            .json("challenge")
    }

    /// # Errors
    ///
    /// CA CSR'ı reddederse veya yanıt çözümlenemezse `AcmeClientError` döner.
    pub async fn finalize(
        &self,
        key: &AccountKey,
        account_url: &Url,
        finalize_url: &Url,
        csr_der: &[u8],
    ) -> Result<Order, AcmeClientError> {
        let payload = build_finalize_payload(csr_der);
        self.post_json(key, account_url, finalize_url, &payload)
            .await?
            .json("sipariş")
    }

    /// PEM sertifika zincirini indirir.
    ///
    /// # Errors
    ///
    /// İstek başarısız olursa veya gövde UTF-8 değilse `AcmeClientError` döner.
    pub async fn download_certificate(
        &self,
        key: &AccountKey,
        account_url: &Url,
        certificate_url: &Url,
    ) -> Result<String, AcmeClientError> {
        let response = self.post_as_get(key, account_url, certificate_url).await?;
        String::from_utf8(response.body)
            .map_err(|_| AcmeClientError::Malformed("sertifika zinciri UTF-8 değil".to_owned()))
    }

    async fn post_json<T: Serialize + Sync>(
        &self,
        key: &AccountKey,
        account_url: &Url,
        url: &Url,
        payload: &T,
    ) -> Result<SignedResponse, AcmeClientError> {
        let bytes = serde_json::to_vec(payload).map_err(JwsError::from)?;
        self.post(key, KeyBinding::Kid(account_url.as_str()), url, Some(&bytes))
            .await
    }

    async fn post_as_get(
        &self,
        key: &AccountKey,
        account_url: &Url,
        url: &Url,
    ) -> Result<SignedResponse, AcmeClientError> {
        self.post(key, KeyBinding::Kid(account_url.as_str()), url, None)
            .await
    }

    async fn post(
        &self,
        key: &AccountKey,
        binding: KeyBinding<'_>,
        url: &Url,
        payload: Option<&[u8]>,
    ) -> Result<SignedResponse, AcmeClientError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let nonce = self.next_nonce().await?;
            let jws = key.sign_payload(payload.unwrap_or_default(), &nonce, url, binding)?;
            let body = serde_json::to_vec(&jws).map_err(JwsError::from)?;
            let response = self
                .http
                .post(url.clone())
                .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
                .header(ACCEPT, format!("application/json, {PEM_CHAIN_CONTENT_TYPE}"))
                .body(body)
                .send()
                .await?;
            let status = response.status();
            let headers = response.headers().clone();
            self.absorb(&headers);
            let body = response.bytes().await?.to_vec();

            if status.is_success() {
                return Ok(SignedResponse {
                    status,
                    headers,
                    body,
                });
            }
            let error = problem_from(status, &body);
            let bad_nonce = error.problem().is_some_and(Problem::is_bad_nonce);
            if bad_nonce && attempt < BAD_NONCE_ATTEMPTS {
                warn!(url = %url, "CA badNonce döndürdü, istek yeni nonce ile tekrarlanıyor");
                continue;
            }
            return Err(error);
        }
    }

    async fn next_nonce(&self) -> Result<ReplayNonce, AcmeClientError> {
        let pooled = self.pool().take();
        if let Some(nonce) = pooled {
            return Ok(nonce);
        }
        let response = self
            .http
            .head(self.directory.new_nonce.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(problem_from(response.status(), &[]));
        }
        ReplayNonce::from_headers(response.headers())?.ok_or_else(|| {
            AcmeClientError::Malformed("newNonce yanıtında Replay-Nonce yok".to_owned())
        })
    }

    fn absorb(&self, headers: &HeaderMap) {
        self.pool().absorb(headers);
    }

    fn pool(&self) -> std::sync::MutexGuard<'_, NoncePool> {
        self.nonces.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn problem_from(status: StatusCode, body: &[u8]) -> AcmeClientError {
    let problem = serde_json::from_slice::<Problem>(body)
        .unwrap_or_else(|_| Problem::from_status(status.as_u16()));
    AcmeClientError::Problem {
        status: status.as_u16(),
        problem,
    }
}
