//! Sipariş → yetkilendirme → finalize → indirme akışı.
//!
//! Akış açık bir durum makinesi olarak yürür; her geçiş tek bir CA
//! etkileşimine karşılık gelir. Yalnızca HTTP-01 challenge'ları kullanılır.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use url::Url;
use zeroize::Zeroizing;

use autocert_acme::{
    AuthorizationStatus, CertificateChain, CertificateKeyKind, CertificateRequest, Challenge,
    Http01KeyAuthorization, NewOrderRequest, Order, OrderHandle, OrderStatus, Problem,
};

use crate::account_store::AccountCredential;
use crate::authority::{AccountContext, CaError, CertificateAuthority};
use crate::challenge::ChallengeResponder;

/// Yoklama aralığı ve üst sınırı.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// İki sorgu arasındaki bekleme.
    pub interval: Duration,
    /// Vazgeçmeden önceki en fazla sorgu sayısı.
    pub attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            attempts: 30,
        }
    }
}

#[derive(Debug, Error)]
pub enum AcquireError {
    /// CA'ya ulaşılamadı veya 5xx döndü.
    #[error("CA erişilemez: {0}")]
    CaUnavailable(String),
    /// CA yanıtı beklenen biçimde değil.
    #[error("CA yanıtı anlaşılamadı: {0}")]
    MalformedResponse(String),
    /// Kullanım koşullarını kabul eden newAccount isteği reddedildi.
    #[error("kullanım koşulları kabul edilmedi: {0}")]
    TosRejected(Problem),
    /// Sipariş, finalize ya da indirme isteği reddedildi.
    #[error("CA isteği reddetti: {0}")]
    Rejected(Problem),
    /// Geçersiz kalan yetkilendirmeler, alan adı → neden.
    #[error("doğrulama başarısız: {}", describe_failures(.failures))]
    ChallengeFailed { failures: BTreeMap<String, String> },
    #[error("sertifika anahtarı ya da CSR üretilemedi: {0}")]
    KeyGeneration(String),
    /// Kimlik bilgisinde hesap URL'si yok.
    #[error("hesap henüz kayıtlı değil")]
    NotRegistered,
    #[error("alan adı listesi geçersiz: {0}")]
    InvalidDomains(String),
}

fn describe_failures(failures: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (index, (domain, reason)) in failures.iter().enumerate() {
        if index > 0 {
            out.push_str("; ");
        }
        let _ = write!(out, "{domain}: {reason}");
    }
    out
}

impl From<CaError> for AcquireError {
    fn from(err: CaError) -> Self {
        match err {
            CaError::Unavailable(reason) => Self::CaUnavailable(reason),
            CaError::Malformed(reason) => Self::MalformedResponse(reason),
            CaError::Rejected(problem) => Self::Rejected(problem),
        }
    }
}

/// Bir sertifikanın yazılmaya hazır tüm parçaları.
pub struct CredentialBundle {
    /// Birincil (ilk) alan adı.
    pub domain: String,
    /// Sipariş edilen tüm adlar, istek sırasıyla.
    pub domains: Vec<String>,
    /// Yaprak sertifika, PEM.
    pub certificate_pem: String,
    /// Sertifika anahtarı, PKCS#8 PEM.
    pub private_key_pem: Zeroizing<String>,
    /// Zincirin geri kalanı; CA yalnızca yaprak döndürdüyse `None`.
    pub issuer_certificate_pem: Option<String>,
    /// Sertifika ardından özel anahtar.
    pub combined_pem: Zeroizing<String>,
    /// Sekmeyle girintilenmiş sertifika kaynağı bilgisi.
    pub metadata_json: String,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("domain", &self.domain)
            .field("domains", &self.domains)
            .field("issuer", &self.issuer_certificate_pem.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IssuanceMetadata<'a> {
    domain: &'a str,
    domains: &'a [String],
    cert_url: &'a str,
    order_url: &'a str,
    account_ref: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    issued_at: OffsetDateTime,
}

impl IssuanceMetadata<'_> {
    /// Sekmeyle girintili JSON.
    fn to_tab_indented(&self) -> Result<String, serde_json::Error> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

enum AcquisitionState {
    AgreeingToTerms,
    Ordering,
    Authorizing {
        order: OrderHandle,
        queue: VecDeque<Url>,
        failures: BTreeMap<String, String>,
    },
    Validating {
        order: OrderHandle,
        queue: VecDeque<Url>,
        failures: BTreeMap<String, String>,
        domain: String,
        authorization_url: Url,
        challenge: Box<Challenge>,
    },
    Finalizing {
        order: OrderHandle,
    },
    AwaitingCertificate {
        order: OrderHandle,
        latest: Order,
        request: CertificateRequest,
    },
    Downloading {
        order: OrderHandle,
        certificate_url: Url,
        request: CertificateRequest,
    },
    Done(CredentialBundle),
}

impl AcquisitionState {
    const fn name(&self) -> &'static str {
        match self {
            Self::AgreeingToTerms => "agreeing_to_terms",
            Self::Ordering => "ordering",
            Self::Authorizing { .. } => "authorizing",
            Self::Validating { .. } => "validating",
            Self::Finalizing { .. } => "finalizing",
            Self::AwaitingCertificate { .. } => "awaiting_certificate",
            Self::Downloading { .. } => "downloading",
            Self::Done(_) => "done",
        }
    }
}

/// Kayıtlı bir hesapla alan adları için sertifika alır.
pub struct Acquirer {
    authority: Arc<dyn CertificateAuthority>,
    responder: ChallengeResponder,
    key_kind: CertificateKeyKind,
    poll: PollPolicy,
}

impl Acquirer {
    #[must_use]
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        responder: ChallengeResponder,
        key_kind: CertificateKeyKind,
    ) -> Self {
        Self {
            authority,
            responder,
            key_kind,
            poll: PollPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Alan adlarının tamamı için tek bir sertifika alır.
    ///
    /// Bir alan adının doğrulaması başarısız olursa diğerleri yine denenir,
    /// ancak paket üretilmez.
    ///
    /// # Errors
    ///
    /// Herhangi bir aşama başarısız olursa `AcquireError` döner.
    pub async fn acquire(
        &self,
        domains: &[String],
        credential: &AccountCredential,
    ) -> Result<CredentialBundle, AcquireError> {
        let order_request = NewOrderRequest::for_dns_names(domains)
            .map_err(|err| AcquireError::InvalidDomains(err.to_string()))?;
        let names: Vec<String> = order_request
            .identifiers()
            .iter()
            .map(|identifier| identifier.value.clone())
            .collect();
        let registration = credential
            .registration()
            .ok_or(AcquireError::NotRegistered)?;
        let account = AccountContext {
            key: credential.key(),
            url: &registration.uri,
        };
        let thumbprint = credential.key().thumbprint();

        let mut state = AcquisitionState::AgreeingToTerms;
        loop {
            debug!(state = state.name(), "sertifika alma durumu");
            state = match state {
                AcquisitionState::AgreeingToTerms => {
                    self.authority
                        .agree_to_terms(account.key)
                        .await
                        .map_err(|err| match err {
                            CaError::Rejected(problem) => AcquireError::TosRejected(problem),
                            other => other.into(),
                        })?;
                    AcquisitionState::Ordering
                }
                AcquisitionState::Ordering => {
                    let order = self.authority.new_order(account, &order_request).await?;
                    info!(order = %order.url, domains = ?names, "sipariş oluşturuldu");
                    AcquisitionState::Authorizing {
                        queue: order.order.authorizations.iter().cloned().collect(),
                        order,
                        failures: BTreeMap::new(),
                    }
                }
                AcquisitionState::Authorizing {
                    order,
                    mut queue,
                    mut failures,
                } => match queue.pop_front() {
                    None if failures.is_empty() => AcquisitionState::Finalizing { order },
                    None => return Err(AcquireError::ChallengeFailed { failures }),
                    Some(authorization_url) => {
                        let authorization = self
                            .authority
                            .authorization(account, &authorization_url)
                            .await?;
                        let domain = authorization.identifier.value.clone();
                        if authorization.status == AuthorizationStatus::Valid {
                            debug!(domain = %domain, "yetkilendirme zaten geçerli");
                            AcquisitionState::Authorizing {
                                order,
                                queue,
                                failures,
                            }
                        } else if let Some(challenge) = authorization.http01() {
                            AcquisitionState::Validating {
                                order,
                                queue,
                                failures,
                                domain,
                                authorization_url,
                                challenge: Box::new(challenge.clone()),
                            }
                        } else {
                            warn!(domain = %domain, "CA http-01 challenge sunmadı");
                            failures.insert(domain, "http-01 challenge sunulmadı".to_string());
                            AcquisitionState::Authorizing {
                                order,
                                queue,
                                failures,
                            }
                        }
                    }
                },
                AcquisitionState::Validating {
                    order,
                    queue,
                    mut failures,
                    domain,
                    authorization_url,
                    challenge,
                } => {
                    match self
                        .validate(account, &thumbprint, &authorization_url, &challenge)
                        .await?
                    {
                        Some(reason) => {
                            warn!(domain = %domain, reason = %reason, "doğrulama başarısız");
                            failures.insert(domain, reason);
                        }
                        None => info!(domain = %domain, "alan adı doğrulandı"),
                    }
                    AcquisitionState::Authorizing {
                        order,
                        queue,
                        failures,
                    }
                }
                AcquisitionState::Finalizing { order } => {
                    let request = self.generate_request(&names).await?;
                    let latest = self
                        .authority
                        .finalize(account, &order.order.finalize, request.csr_der())
                        .await?;
                    AcquisitionState::AwaitingCertificate {
                        order,
                        latest,
                        request,
                    }
                }
                AcquisitionState::AwaitingCertificate {
                    order,
                    latest,
                    request,
                } => {
                    let certificate_url = self
                        .await_certificate(account, &order.url, latest, &names)
                        .await?;
                    AcquisitionState::Downloading {
                        order,
                        certificate_url,
                        request,
                    }
                }
                AcquisitionState::Downloading {
                    order,
                    certificate_url,
                    request,
                } => {
                    let body = self
                        .authority
                        .download_certificate(account, &certificate_url)
                        .await?;
                    let chain = CertificateChain::from_pem(&body)
                        .map_err(|err| AcquireError::MalformedResponse(err.to_string()))?;
                    let bundle = assemble_bundle(
                        &names,
                        &chain,
                        &request,
                        &certificate_url,
                        &order.url,
                        account.url,
                    )?;
                    AcquisitionState::Done(bundle)
                }
                AcquisitionState::Done(bundle) => {
                    info!(domain = %bundle.domain, "sertifika alındı");
                    return Ok(bundle);
                }
            };
        }
    }

    /// Challenge'ı yayınlar, CA'ya bildirir ve sonucu bekler.
    ///
    /// Alan adına özgü başarısızlık `Ok(Some(neden))` olarak döner; token her
    /// durumda yayından kaldırılır.
    async fn validate(
        &self,
        account: AccountContext<'_>,
        thumbprint: &str,
        authorization_url: &Url,
        challenge: &Challenge,
    ) -> Result<Option<String>, AcquireError> {
        let key_authorization = match Http01KeyAuthorization::from_challenge(challenge, thumbprint) {
            Ok(value) => value,
            Err(err) => return Ok(Some(err.to_string())),
        };
        self.responder.publish(&key_authorization).await;
        let outcome = self
            .confirm_challenge(account, authorization_url, challenge)
            .await;
        self.responder.withdraw(key_authorization.token()).await;
        outcome
    }

    async fn confirm_challenge(
        &self,
        account: AccountContext<'_>,
        authorization_url: &Url,
        challenge: &Challenge,
    ) -> Result<Option<String>, AcquireError> {
        match self
            .authority
            .respond_to_challenge(account, &challenge.url)
            .await
        {
            Ok(()) => {}
            Err(CaError::Rejected(problem)) => return Ok(Some(problem.to_string())),
            Err(err) => return Err(err.into()),
        }
        for _ in 0..self.poll.attempts {
            tokio::time::sleep(self.poll.interval).await;
            let authorization = self
                .authority
                .authorization(account, authorization_url)
                .await?;
            match authorization.status {
                AuthorizationStatus::Valid => return Ok(None),
                AuthorizationStatus::Pending => {}
                _ => return Ok(Some(authorization.failure_reason())),
            }
        }
        Ok(Some("doğrulama zaman aşımına uğradı".to_string()))
    }

    async fn generate_request(&self, names: &[String]) -> Result<CertificateRequest, AcquireError> {
        let names = names.to_vec();
        let kind = self.key_kind;
        tokio::task::spawn_blocking(move || {
            CertificateRequest::generate(&names, kind).map_err(|err| err.to_string())
        })
        .await
        .map_err(|err| AcquireError::KeyGeneration(err.to_string()))?
        .map_err(AcquireError::KeyGeneration)
    }

    async fn await_certificate(
        &self,
        account: AccountContext<'_>,
        order_url: &Url,
        mut latest: Order,
        names: &[String],
    ) -> Result<Url, AcquireError> {
        let mut polls = 0;
        loop {
            match latest.status {
                OrderStatus::Valid => {
                    return latest.certificate.ok_or_else(|| {
                        AcquireError::MalformedResponse(
                            "geçerli sipariş sertifika URL'si içermiyor".to_string(),
                        )
                    });
                }
                OrderStatus::Invalid => {
                    let reason = latest.error.map_or_else(
                        || "sipariş geçersiz durumda".to_string(),
                        |problem| problem.to_string(),
                    );
                    let failures = names
                        .iter()
                        .map(|name| (name.clone(), reason.clone()))
                        .collect();
                    return Err(AcquireError::ChallengeFailed { failures });
                }
                _ if polls >= self.poll.attempts => {
                    return Err(AcquireError::CaUnavailable(format!(
                        "sipariş {} yoklamada tamamlanmadı",
                        self.poll.attempts
                    )));
                }
                _ => {}
            }
            polls += 1;
            tokio::time::sleep(self.poll.interval).await;
            latest = self.authority.order(account, order_url).await?;
        }
    }
}

fn assemble_bundle(
    names: &[String],
    chain: &CertificateChain,
    request: &CertificateRequest,
    certificate_url: &Url,
    order_url: &Url,
    account_url: &Url,
) -> Result<CredentialBundle, AcquireError> {
    let domain = names
        .first()
        .cloned()
        .ok_or_else(|| AcquireError::InvalidDomains("alan adı yok".to_string()))?;
    let certificate_pem = chain.leaf_pem().to_string();
    let private_key_pem = Zeroizing::new(request.private_key_pem().to_string());
    let combined_pem = Zeroizing::new(format!("{certificate_pem}{}", private_key_pem.as_str()));
    let metadata_json = IssuanceMetadata {
        domain: &domain,
        domains: names,
        cert_url: certificate_url.as_str(),
        order_url: order_url.as_str(),
        account_ref: account_url.as_str(),
        issued_at: OffsetDateTime::now_utc(),
    }
    .to_tab_indented()
    .map_err(|err| AcquireError::MalformedResponse(err.to_string()))?;

    Ok(CredentialBundle {
        domain,
        domains: names.to_vec(),
        certificate_pem,
        private_key_pem,
        issuer_certificate_pem: chain.issuer_pem(),
        combined_pem,
        metadata_json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{registered_credential, token_for, StubAuthority, ISSUER_PEM, LEAF_PEM};
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn fast_poll() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            attempts: 5,
        }
    }

    fn acquirer(authority: &Arc<StubAuthority>, responder: ChallengeResponder) -> Acquirer {
        let authority: Arc<dyn CertificateAuthority> = authority.clone();
        Acquirer::new(authority, responder, CertificateKeyKind::EcdsaP256)
            .with_poll_policy(fast_poll())
    }

    fn domains(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    #[tokio::test]
    async fn acquires_bundle_for_two_domains() {
        let responder = ChallengeResponder::new();
        let authority = Arc::new(StubAuthority::with_responder(responder.clone()));
        let credential = registered_credential();

        let bundle = acquirer(&authority, responder.clone())
            .acquire(&domains(&["a.test", "b.test"]), &credential)
            .await
            .expect("paket");

        assert_eq!(bundle.domain, "a.test");
        assert_eq!(bundle.domains, domains(&["a.test", "b.test"]));
        assert_eq!(bundle.certificate_pem, LEAF_PEM);
        assert_eq!(bundle.issuer_certificate_pem.as_deref(), Some(ISSUER_PEM));
        assert!(bundle.private_key_pem.contains("PRIVATE KEY"));
        assert_eq!(
            bundle.combined_pem.as_str(),
            format!("{LEAF_PEM}{}", bundle.private_key_pem.as_str())
        );

        let metadata: Value = serde_json::from_str(&bundle.metadata_json).expect("json");
        assert_eq!(metadata["domain"], "a.test");
        assert_eq!(metadata["certUrl"], "https://ca.test/cert/1");
        assert_eq!(metadata["accountRef"], "https://ca.test/acct/1");
        assert!(bundle.metadata_json.contains("\n\t\"domain\""));

        let thumbprint = credential.key().thumbprint();
        let observed = authority.observed.lock().expect("kilit").clone();
        for domain in ["a.test", "b.test"] {
            assert_eq!(
                observed.get(domain).cloned().flatten(),
                Some(format!("{}.{thumbprint}", token_for(domain)))
            );
        }
        assert!(responder.is_empty().await, "tokenlar kaldırılmalı");
        assert_eq!(StubAuthority::calls(&authority.agree_calls), 1);
        assert_eq!(StubAuthority::calls(&authority.finalize_calls), 1);
    }

    #[tokio::test]
    async fn partial_validation_failure_yields_no_bundle() {
        let responder = ChallengeResponder::new();
        let authority = Arc::new(StubAuthority::with_responder(responder.clone()));
        authority.fail_domain("b.test");

        let err = acquirer(&authority, responder.clone())
            .acquire(&domains(&["a.test", "b.test", "c.test"]), &registered_credential())
            .await
            .expect_err("başarısız olmalı");

        match err {
            AcquireError::ChallengeFailed { failures } => {
                assert_eq!(failures.keys().collect::<Vec<_>>(), vec!["b.test"]);
                assert!(failures["b.test"].starts_with("unauthorized:"));
            }
            other => panic!("beklenmeyen hata: {other:?}"),
        }
        assert_eq!(authority.observed.lock().expect("kilit").len(), 3);
        assert_eq!(StubAuthority::calls(&authority.finalize_calls), 0);
        assert_eq!(StubAuthority::calls(&authority.download_calls), 0);
        assert!(responder.is_empty().await);
    }

    #[tokio::test]
    async fn rejected_terms_stop_before_ordering() {
        let authority = Arc::new(StubAuthority::default());
        *authority.agree_error.lock().expect("kilit") = Some(CaError::Rejected(Problem {
            problem_type: "urn:ietf:params:acme:error:userActionRequired".to_string(),
            ..Problem::default()
        }));

        let err = acquirer(&authority, ChallengeResponder::new())
            .acquire(&domains(&["a.test"]), &registered_credential())
            .await
            .expect_err("koşullar reddedildi");
        assert!(matches!(err, AcquireError::TosRejected(_)));
        assert_eq!(StubAuthority::calls(&authority.order_calls), 0);
    }

    #[tokio::test]
    async fn unregistered_account_is_refused() {
        let authority = Arc::new(StubAuthority::default());
        let credential = AccountCredential::new(
            "ops@a.test".to_string(),
            crate::testing::account_key(),
            None,
        );
        let err = acquirer(&authority, ChallengeResponder::new())
            .acquire(&domains(&["a.test"]), &credential)
            .await
            .expect_err("kayıt yok");
        assert!(matches!(err, AcquireError::NotRegistered));
        assert_eq!(StubAuthority::calls(&authority.agree_calls), 0);
    }

    #[test]
    fn failure_summary_lists_every_domain() {
        let mut failures = BTreeMap::new();
        failures.insert("b.test".to_string(), "timeout".to_string());
        failures.insert("a.test".to_string(), "dns".to_string());
        let err = AcquireError::ChallengeFailed { failures };
        assert_eq!(err.to_string(), "doğrulama başarısız: a.test: dns; b.test: timeout");
    }
}
