use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use tracing::info;

use crate::account_store::AccountStore;
use crate::acquirer::Acquirer;
use crate::archive::CertificateArchive;
use crate::authority::{AcmeAuthority, CertificateAuthority};
use crate::challenge::ChallengeResponder;
use crate::config::{SecretStoreBackend, ServerConfig};
use crate::coordinator::{Coordinator, ProvisioningRequest};
use crate::error::ServerError;
use crate::registrar::Registrar;
use crate::secret_store::{KubernetesSecretStore, MemorySecretStore, SecretStore};

const ACME_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("autocert/", env!("CARGO_PKG_VERSION"));

/// HTTP işleyicilerinin ve sürücünün paylaştığı durum.
pub struct AppState {
    instance_id: String,
    coordinator: Coordinator,
    responder: ChallengeResponder,
    request: ProvisioningRequest,
}

impl AppState {
    #[must_use]
    pub fn new(
        coordinator: Coordinator,
        responder: ChallengeResponder,
        request: ProvisioningRequest,
    ) -> Self {
        Self {
            instance_id: generate_instance_id(),
            coordinator,
            responder,
            request,
        }
    }

    /// Yapılandırmadan CA istemcisini, gizli depoyu ve koordinatörü kurar.
    ///
    /// # Errors
    ///
    /// Hesap anahtarı okunamazsa, Kubernetes istemcisi ya da ACME HTTP
    /// istemcisi kurulamazsa `ServerError` döner.
    pub async fn try_new(config: &ServerConfig) -> Result<Self, ServerError> {
        let credential = AccountStore::new(
            config.email.clone(),
            config.account_key_pem.clone(),
            config.cached_registration.clone(),
        )
        .load()?;

        let store: Arc<dyn SecretStore> = match &config.secret_store {
            SecretStoreBackend::Kubernetes { namespace } => {
                let store = KubernetesSecretStore::connect(namespace.as_deref()).await?;
                info!(namespace = store.namespace(), "Kubernetes gizli deposu");
                Arc::new(store)
            }
            SecretStoreBackend::Memory => {
                info!("bellek içi gizli depo kullanılıyor");
                Arc::new(MemorySecretStore::new())
            }
        };

        let http = reqwest::Client::builder()
            .timeout(ACME_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ServerError::Configuration(format!("ACME HTTP istemcisi: {err}")))?;
        let authority: Arc<dyn CertificateAuthority> =
            Arc::new(AcmeAuthority::new(http, config.ca_server.clone()));

        let responder = ChallengeResponder::new();
        let registrar = Registrar::new(
            Arc::clone(&authority),
            Arc::clone(&store),
            config.account_secret_name.clone(),
        );
        let acquirer = Acquirer::new(authority, responder.clone(), config.key_kind);
        let mut coordinator = Coordinator::new(registrar, acquirer, store, credential);
        if let Some(dir) = &config.certs_dir {
            coordinator = coordinator.with_archive(CertificateArchive::new(dir.clone()));
        }

        Ok(Self::new(
            coordinator,
            responder,
            ProvisioningRequest::from_config(config),
        ))
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub const fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    #[must_use]
    pub const fn responder(&self) -> &ChallengeResponder {
        &self.responder
    }

    /// Yapılandırmadan gelen üretim isteği.
    #[must_use]
    pub const fn request(&self) -> &ProvisioningRequest {
        &self.request
    }
}

/// UUIDv4 biçiminde rastgele örnek kimliği.
fn generate_instance_id() -> String {
    let mut bytes = [0_u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let mut id = String::with_capacity(36);
    for (index, byte) in bytes.iter().enumerate() {
        if matches!(index, 4 | 6 | 8 | 10) {
            id.push('-');
        }
        let _ = write!(id, "{byte:02x}");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config_from;
    use pretty_assertions::assert_eq;

    #[test]
    fn instance_id_is_uuid_v4_shaped() {
        let id = generate_instance_id();
        assert_eq!(id.len(), 36);
        let groups: Vec<&str> = id.split('-').collect();
        assert_eq!(
            groups.iter().map(|group| group.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
        assert!(groups[2].starts_with('4'));
        assert!(matches!(groups[3].as_bytes()[0], b'8' | b'9' | b'a' | b'b'));
        assert_ne!(id, generate_instance_id());
    }

    #[tokio::test]
    async fn builds_memory_backed_state() {
        let key = crate::testing::account_key().to_pem().expect("pem");
        let config = config_from(&[
            ("DOMAINS", "a.test, b.test"),
            ("EMAIL", "ops@a.test"),
            ("SECRET_NAME", "web-tls"),
            ("SECRET_STORE", "memory"),
            ("LETS_ENCRYPT_USER_CERT", key.as_str()),
        ])
        .expect("yapılandırma");

        let state = AppState::try_new(&config).await.expect("durum");
        assert_eq!(state.request().domains(), ["a.test".to_string(), "b.test".to_string()]);
        assert_eq!(state.request().secret_name(), "web-tls");
        assert!(!state.coordinator().is_busy());
        assert!(state.responder().is_empty().await);
    }

    #[tokio::test]
    async fn missing_account_key_is_rejected() {
        let config = config_from(&[("SECRET_STORE", "memory")]).expect("yapılandırma");
        let err = AppState::try_new(&config).await.err().expect("anahtar yok");
        assert!(matches!(err, ServerError::AccountStore(_)));
    }
}
