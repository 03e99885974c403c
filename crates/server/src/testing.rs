//! Birim testleri için bellek içi CA ve hesap yardımcıları.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::json;
use url::Url;

use autocert_acme::{
    AccountKey, Authorization, EcdsaP256AccountKey, NewAccountRequest, NewOrderRequest, Order,
    OrderHandle,
};

use crate::account_store::{AccountCredential, Registration};
use crate::authority::{AccountContext, CaError, CertificateAuthority, RegisteredAccount};
use crate::challenge::ChallengeResponder;

pub const BASE: &str = "https://ca.test";
pub const LEAF_PEM: &str = "-----BEGIN CERTIFICATE-----\nTEVBRg==\n-----END CERTIFICATE-----\n";
pub const ISSUER_PEM: &str = "-----BEGIN CERTIFICATE-----\nSVNTVUVS\n-----END CERTIFICATE-----\n";

pub fn account_key() -> AccountKey {
    AccountKey::EcdsaP256(EcdsaP256AccountKey::from_bytes(&[11_u8; 32]).expect("anahtar"))
}

pub fn registration() -> Registration {
    Registration {
        uri: url("/acct/1"),
        terms_of_service: Some(url("/tos")),
        body: json!({"status": "valid"}),
    }
}

pub fn registered_credential() -> AccountCredential {
    AccountCredential::new("ops@a.test".to_owned(), account_key(), Some(registration()))
}

pub fn url(path: &str) -> Url {
    Url::parse(&format!("{BASE}{path}")).expect("url")
}

/// Alan adından HTTP-01 için geçerli bir token türetir.
pub fn token_for(domain: &str) -> String {
    format!("{:_<24}", domain.replace('.', "_"))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct OrderState {
    domains: Vec<String>,
    responded: HashSet<String>,
    finalized: bool,
}

/// Komut verilebilen sahte CA.
#[derive(Default)]
pub struct StubAuthority {
    pub register_calls: AtomicUsize,
    pub agree_calls: AtomicUsize,
    pub order_calls: AtomicUsize,
    pub finalize_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    /// Doğrulaması başarısız olacak alan adları.
    pub failing_domains: Mutex<HashSet<String>>,
    /// `register` çağrılarında dönülecek hata.
    pub register_error: Mutex<Option<CaError>>,
    pub agree_error: Mutex<Option<CaError>>,
    pub order_error: Mutex<Option<CaError>>,
    /// İlk N `new_order` çağrısı erişilemez hatası döner.
    pub unavailable_orders: AtomicUsize,
    /// Verilirse `respond_to_challenge` sırasında tokenın yayında olduğu doğrulanır.
    pub responder: Option<ChallengeResponder>,
    /// Challenge'a yanıt verilirken yayında görülen key authorization değerleri.
    pub observed: Mutex<BTreeMap<String, Option<String>>>,
    state: Mutex<OrderState>,
}

impl StubAuthority {
    pub fn with_responder(responder: ChallengeResponder) -> Self {
        Self {
            responder: Some(responder),
            ..Self::default()
        }
    }

    pub fn fail_domain(&self, domain: &str) {
        lock(&self.failing_domains).insert(domain.to_owned());
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn domain_of(url: &Url) -> String {
        url.path_segments()
            .and_then(Iterator::last)
            .unwrap_or_default()
            .to_owned()
    }

    fn order_body(&self) -> Order {
        let state = lock(&self.state);
        let status = if state.finalized { "valid" } else { "pending" };
        let mut body = json!({
            "status": status,
            "identifiers": state.domains.iter().map(|d| json!({"type": "dns", "value": d})).collect::<Vec<_>>(),
            "authorizations": state.domains.iter().map(|d| format!("{BASE}/authz/{d}")).collect::<Vec<_>>(),
            "finalize": format!("{BASE}/order/1/finalize"),
        });
        if state.finalized {
            body["certificate"] = json!(format!("{BASE}/cert/1"));
        }
        serde_json::from_value(body).expect("sipariş")
    }
}

#[async_trait]
impl CertificateAuthority for StubAuthority {
    async fn register(
        &self,
        _key: &AccountKey,
        request: &NewAccountRequest,
    ) -> Result<RegisteredAccount, CaError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.register_error).clone() {
            return Err(err);
        }
        assert!(request.terms_of_service_agreed());
        Ok(RegisteredAccount {
            url: url("/acct/1"),
            terms_of_service: Some(url("/tos")),
            body: json!({"status": "valid"}),
        })
    }

    async fn agree_to_terms(&self, _key: &AccountKey) -> Result<(), CaError> {
        self.agree_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.agree_error).clone().map_or(Ok(()), Err)
    }

    async fn new_order(
        &self,
        _account: AccountContext<'_>,
        request: &NewOrderRequest,
    ) -> Result<OrderHandle, CaError> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.order_error).clone() {
            return Err(err);
        }
        let remaining = self.unavailable_orders.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unavailable_orders.store(remaining - 1, Ordering::SeqCst);
            return Err(CaError::Unavailable("bağlantı reddedildi".to_owned()));
        }
        *lock(&self.state) = OrderState {
            domains: request
                .identifiers()
                .iter()
                .map(|identifier| identifier.value.clone())
                .collect(),
            ..OrderState::default()
        };
        Ok(OrderHandle {
            url: url("/order/1"),
            order: self.order_body(),
        })
    }

    async fn authorization(
        &self,
        _account: AccountContext<'_>,
        url: &Url,
    ) -> Result<Authorization, CaError> {
        let domain = Self::domain_of(url);
        let responded = lock(&self.state).responded.contains(&domain);
        let failing = lock(&self.failing_domains).contains(&domain);
        let (status, challenge_status, error) = match (responded, failing) {
            (false, _) => ("pending", "pending", None),
            (true, false) => ("valid", "valid", None),
            (true, true) => (
                "invalid",
                "invalid",
                Some(json!({
                    "type": "urn:ietf:params:acme:error:unauthorized",
                    "detail": format!("Invalid response from http://{domain}/.well-known/acme-challenge/")
                })),
            ),
        };
        let mut challenge = json!({
            "type": "http-01",
            "url": format!("{BASE}/chall/{domain}"),
            "status": challenge_status,
            "token": token_for(&domain),
        });
        if let Some(error) = error {
            challenge["error"] = error;
        }
        Ok(serde_json::from_value(json!({
            "identifier": {"type": "dns", "value": domain},
            "status": status,
            "challenges": [
                {"type": "dns-01", "url": format!("{BASE}/chall/dns/{domain}"), "status": "pending", "token": token_for(&domain)},
                challenge
            ]
        }))
        .expect("yetkilendirme"))
    }

    async fn respond_to_challenge(
        &self,
        _account: AccountContext<'_>,
        url: &Url,
    ) -> Result<(), CaError> {
        let domain = Self::domain_of(url);
        if let Some(responder) = &self.responder {
            let published = responder.lookup(&token_for(&domain)).await;
            lock(&self.observed).insert(domain.clone(), published);
        }
        lock(&self.state).responded.insert(domain);
        Ok(())
    }

    async fn order(&self, _account: AccountContext<'_>, _url: &Url) -> Result<Order, CaError> {
        Ok(self.order_body())
    }

    async fn finalize(
        &self,
        _account: AccountContext<'_>,
        _url: &Url,
        csr_der: &[u8],
    ) -> Result<Order, CaError> {
        assert!(!csr_der.is_empty());
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.state).finalized = true;
        let mut order = self.order_body();
        order.status = autocert_acme::OrderStatus::Processing;
        Ok(order)
    }

    async fn download_certificate(
        &self,
        _account: AccountContext<'_>,
        _url: &Url,
    ) -> Result<String, CaError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{LEAF_PEM}{ISSUER_PEM}"))
    }
}
