use std::env::{self, VarError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;
use zeroize::Zeroizing;

use autocert_acme::CertificateKeyKind;

use crate::error::ServerError;
use crate::retry::{Backoff, RetryPolicy, DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS};

pub const DEFAULT_CA_SERVER: &str = "https://acme-v02.api.letsencrypt.org/directory";
const DEFAULT_HTTP_PORT: u16 = 80;

/// Sertifika ve kayıt verisinin yazılacağı arka uç.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretStoreBackend {
    /// Küme içi Kubernetes API sunucusu. Adres ve kimlik bilgisi kube
    /// yapılandırmasından çıkarılır; `namespace` verilmezse servis hesabınınki
    /// kullanılır.
    Kubernetes { namespace: Option<String> },
    /// Süreç içi depo; yalnızca deneme çalıştırmaları içindir.
    Memory,
}

/// Sunucu yapılandırması.
pub struct ServerConfig {
    pub(crate) listen: SocketAddr,
    pub(crate) domains: String,
    pub(crate) email: String,
    pub(crate) secret_name: String,
    pub(crate) account_secret_name: String,
    pub(crate) ca_server: Url,
    pub(crate) account_key_pem: Option<Zeroizing<String>>,
    pub(crate) cached_registration: Option<String>,
    pub(crate) secret_store: SecretStoreBackend,
    pub(crate) key_kind: CertificateKeyKind,
    pub(crate) certs_dir: Option<PathBuf>,
    pub(crate) retry: RetryPolicy,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field("domains", &self.domains)
            .field("email", &self.email)
            .field("secret_name", &self.secret_name)
            .field("account_secret_name", &self.account_secret_name)
            .field("ca_server", &self.ca_server.as_str())
            .field("account_key", &self.account_key_pem.as_ref().map(|_| "<redacted>"))
            .field("secret_store", &self.secret_store)
            .field("key_kind", &self.key_kind)
            .field("certs_dir", &self.certs_dir)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Çevre değişkenlerinden yapılandırmayı oluşturur.
    ///
    /// # Errors
    ///
    /// Değerlerden biri geçersizse `ServerError::Configuration` döner.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| env::var(key))
    }

    /// Değerleri verilen arama fonksiyonundan okur.
    ///
    /// `DOMAINS`, `EMAIL` ve `SECRET_NAME` burada zorunlu değildir; eksiklikleri
    /// çalıştırma isteği oluşturulurken raporlanır.
    ///
    /// # Errors
    ///
    /// Değerlerden biri geçersizse `ServerError::Configuration` döner.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let port = parse_or(&lookup, "HTTP_PORT", DEFAULT_HTTP_PORT)?;
        let listen = SocketAddr::from(([0, 0, 0, 0], port));

        let domains = optional(&lookup, "DOMAINS")?.unwrap_or_default();
        let email = optional(&lookup, "EMAIL")?.unwrap_or_default();
        let secret_name = optional(&lookup, "SECRET_NAME")?.unwrap_or_default();
        let account_secret_name =
            optional(&lookup, "LETS_ENCRYPT_USER_SECRET_NAME")?.unwrap_or_else(|| secret_name.clone());

        let ca_raw = optional(&lookup, "CA_SERVER")?.unwrap_or_else(|| DEFAULT_CA_SERVER.to_string());
        let ca_server = Url::parse(&ca_raw)
            .map_err(|err| ServerError::Configuration(format!("CA_SERVER geçersiz: {err}")))?;

        let account_key_pem = optional(&lookup, "LETS_ENCRYPT_USER_CERT")?.map(Zeroizing::new);
        let cached_registration = optional(&lookup, "LETS_ENCRYPT_USER_REGISTRATION")?;

        let secret_store = match optional(&lookup, "SECRET_STORE")?.as_deref() {
            None | Some("kubernetes") => SecretStoreBackend::Kubernetes {
                namespace: optional(&lookup, "SECRET_NAMESPACE")?,
            },
            Some("memory") => SecretStoreBackend::Memory,
            Some(other) => {
                return Err(ServerError::Configuration(format!(
                    "SECRET_STORE bilinmiyor: {other} (kubernetes|memory)"
                )));
            }
        };

        let key_kind = optional(&lookup, "CERT_KEY_TYPE")?
            .map(|raw| raw.parse::<CertificateKeyKind>())
            .transpose()
            .map_err(|err| ServerError::Configuration(format!("CERT_KEY_TYPE: {err}")))?
            .unwrap_or_default();

        let certs_dir = optional(&lookup, "CERTS_DIR")?.map(PathBuf::from);
        let retry = retry_policy(&lookup)?;

        Ok(Self {
            listen,
            domains,
            email,
            secret_name,
            account_secret_name,
            ca_server,
            account_key_pem,
            cached_registration,
            secret_store,
            key_kind,
            certs_dir,
            retry,
        })
    }

    #[must_use]
    pub const fn listen(&self) -> SocketAddr {
        self.listen
    }

    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Boş değerler tanımsız kabul edilir.
fn optional<F>(lookup: &F, key: &str) -> Result<Option<String>, ServerError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match lookup(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ServerError::Configuration(format!(
            "{key} ASCII olmayan karakterler içeriyor"
        ))),
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ServerError>
where
    F: Fn(&str) -> Result<String, VarError>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional(lookup, key)?.map_or(Ok(default), |raw| {
        raw.parse::<T>().map_err(|err| {
            ServerError::Configuration(format!("{key} geçerli bir sayı değil: {err}"))
        })
    })
}

fn retry_policy<F>(lookup: &F) -> Result<RetryPolicy, ServerError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let max_attempts = parse_or(lookup, "RETRY_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
    if max_attempts == 0 {
        return Err(ServerError::Configuration(
            "RETRY_ATTEMPTS 0 olamaz".to_string(),
        ));
    }
    let delay = parse_or(lookup, "RETRY_DELAY_SECS", DEFAULT_DELAY.as_secs())?;
    let backoff = match optional(lookup, "RETRY_BACKOFF")?.as_deref() {
        None | Some("fixed") => Backoff::Fixed,
        Some("exponential") => Backoff::exponential(),
        Some(other) => {
            return Err(ServerError::Configuration(format!(
                "RETRY_BACKOFF bilinmiyor: {other} (fixed|exponential)"
            )));
        }
    };
    Ok(RetryPolicy {
        max_attempts,
        delay: Duration::from_secs(delay),
        backoff,
    })
}
