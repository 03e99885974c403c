//! Kubernetes Secret nesnelerine birleştirerek yazma.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Config};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Alan adı → ham bayt eşlemesi; sıralı tutulur.
pub type SecretFields = BTreeMap<String, Vec<u8>>;

const FIELD_MANAGER: &str = "autocert";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StoreError {
    /// API sunucusuna bağlanılamadı veya bağlantı yarıda kesildi.
    #[error("gizli depoya ulaşılamadı: {0}")]
    StoreUnreachable(String),
    /// Servis hesabının yetkisi yok (401/403).
    #[error("gizli depo isteği reddetti (HTTP {status})")]
    Unauthorized { status: u16 },
    /// Diğer başarısız API yanıtları; `body` sunucunun mesajıdır.
    #[error("gizli depo beklenmeyen yanıt döndürdü (HTTP {code}): {body}")]
    UnexpectedStatus { code: u16, body: String },
    /// İstemci yapılandırması çıkarılamadı ya da istek kurulamadı.
    #[error("gizli depo istemcisi kurulamadı: {0}")]
    Client(String),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if matches!(response.code, 401 | 403) => {
                Self::Unauthorized {
                    status: response.code,
                }
            }
            kube::Error::Api(response) => Self::UnexpectedStatus {
                code: response.code,
                body: response.message,
            },
            err @ (kube::Error::SerdeError(_) | kube::Error::BuildRequest(_)) => {
                Self::Client(err.to_string())
            }
            other => Self::StoreUnreachable(other.to_string()),
        }
    }
}

/// Adı verilen gizli nesneye alanları birleştirerek yazar.
///
/// Verilmeyen alanlar olduğu gibi kalır; ya tüm alanlar yazılır ya hiçbiri.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn merge_update(&self, secret_name: &str, fields: &SecretFields) -> Result<(), StoreError>;
}

/// Kubernetes API sunucusuna strategic-merge PATCH gönderen depo.
pub struct KubernetesSecretStore {
    client: Client,
    namespace: String,
}

impl KubernetesSecretStore {
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Küme içi yapılandırmayı (ya da yerel kubeconfig'i) çıkarır.
    ///
    /// `namespace` verilmezse servis hesabının namespace'i kullanılır.
    ///
    /// # Errors
    ///
    /// Yapılandırma çıkarılamazsa veya istemci kurulamazsa `StoreError::Client` döner.
    pub async fn connect(namespace: Option<&str>) -> Result<Self, StoreError> {
        let mut config = Config::infer()
            .await
            .map_err(|err| StoreError::Client(format!("Kubernetes yapılandırması: {err}")))?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);
        let namespace = namespace.map_or_else(|| config.default_namespace.clone(), str::to_string);
        let client = Client::try_from(config)
            .map_err(|err| StoreError::Client(format!("Kubernetes istemcisi: {err}")))?;
        Ok(Self::new(client, namespace))
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn patch_for(&self, secret_name: &str, fields: &SecretFields) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.to_string()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            data: Some(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), ByteString(value.clone())))
                    .collect(),
            ),
            ..Secret::default()
        }
    }
}

#[async_trait]
impl SecretStore for KubernetesSecretStore {
    async fn merge_update(&self, secret_name: &str, fields: &SecretFields) -> Result<(), StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let patch = self.patch_for(secret_name, fields);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };
        api.patch(secret_name, &params, &Patch::Strategic(&patch))
            .await?;
        info!(
            secret = secret_name,
            namespace = %self.namespace,
            fields = fields.len(),
            "gizli nesne güncellendi"
        );
        Ok(())
    }
}

/// Süreç içinde tutulan depo; deneme çalıştırmaları ve testler içindir.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, SecretFields>>,
    writes: AtomicUsize,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, secret_name: &str) -> Option<SecretFields> {
        self.secrets.lock().await.get(secret_name).cloned()
    }

    /// Başarılı `merge_update` çağrılarının sayısı.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn merge_update(&self, secret_name: &str, fields: &SecretFields) -> Result<(), StoreError> {
        let mut secrets = self.secrets.lock().await;
        let entry = secrets.entry(secret_name.to_string()).or_default();
        for (key, value) in fields {
            entry.insert(key.clone(), value.clone());
        }
        drop(secrets);
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(secret = secret_name, fields = fields.len(), "bellek deposu güncellendi");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unused_async)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, Method, StatusCode, Uri};
    use axum::routing::any;
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[derive(Default)]
    struct Captured {
        requests: Mutex<Vec<(Method, String, HeaderMap, Value)>>,
    }

    struct MockApi {
        status: StatusCode,
        captured: Captured,
    }

    async fn handler(
        State(api): State<Arc<MockApi>>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: axum::body::Bytes,
    ) -> (StatusCode, Json<Value>) {
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        api.captured
            .requests
            .lock()
            .await
            .push((method, uri.path().to_string(), headers, value));
        let response = if api.status.is_success() {
            json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {"name": "web-tls", "namespace": "default"}
            })
        } else {
            json!({
                "apiVersion": "v1",
                "kind": "Status",
                "status": "Failure",
                "message": "mock reddi",
                "reason": "Invalid",
                "code": api.status.as_u16()
            })
        };
        (api.status, Json(response))
    }

    async fn spawn_api(status: StatusCode) -> (Arc<MockApi>, String) {
        let api = Arc::new(MockApi {
            status,
            captured: Captured::default(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("dinleyici");
        let url = format!("http://{}", listener.local_addr().expect("adres"));
        let router = Router::new()
            .route("/*path", any(handler))
            .with_state(Arc::clone(&api));
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("mock API");
        });
        (api, url)
    }

    fn store_for(url: &str) -> KubernetesSecretStore {
        let config = Config::new(url.parse().expect("uri"));
        let client = Client::try_from(config).expect("istemci");
        KubernetesSecretStore::new(client, "default")
    }

    fn sample_fields() -> SecretFields {
        let mut fields = SecretFields::new();
        fields.insert("a.test.crt".to_string(), b"CERT".to_vec());
        fields.insert("a.test.key".to_string(), b"KEY".to_vec());
        fields
    }

    #[tokio::test]
    async fn patch_is_strategic_merge_with_base64_data() {
        let (api, url) = spawn_api(StatusCode::OK).await;
        store_for(&url)
            .merge_update("web-tls", &sample_fields())
            .await
            .expect("güncelleme");

        let requests = api.captured.requests.lock().await;
        assert_eq!(requests.len(), 1);
        let (method, path, headers, body) = &requests[0];
        assert_eq!(*method, Method::PATCH);
        assert_eq!(path, "/api/v1/namespaces/default/secrets/web-tls");
        assert_eq!(
            headers.get("content-type").and_then(|v| v.to_str().ok()),
            Some("application/strategic-merge-patch+json")
        );
        assert_eq!(
            body,
            &json!({
                "kind": "Secret",
                "apiVersion": "v1",
                "metadata": {"name": "web-tls", "namespace": "default"},
                "data": {"a.test.crt": "Q0VSVA==", "a.test.key": "S0VZ"}
            })
        );
    }

    #[tokio::test]
    async fn status_codes_are_classified() {
        let (_api, url) = spawn_api(StatusCode::FORBIDDEN).await;
        let err = store_for(&url)
            .merge_update("web-tls", &sample_fields())
            .await
            .expect_err("403");
        assert!(matches!(err, StoreError::Unauthorized { status: 403 }));

        let (_api, url) = spawn_api(StatusCode::UNPROCESSABLE_ENTITY).await;
        let err = store_for(&url)
            .merge_update("web-tls", &sample_fields())
            .await
            .expect_err("422");
        match err {
            StoreError::UnexpectedStatus { code, body } => {
                assert_eq!(code, 422);
                assert!(body.contains("mock"));
            }
            other => panic!("beklenmeyen hata: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_api_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("port");
        let addr = listener.local_addr().expect("adres");
        drop(listener);

        let err = store_for(&format!("http://{addr}"))
            .merge_update("web-tls", &sample_fields())
            .await
            .expect_err("bağlantı reddedilmeli");
        assert!(matches!(err, StoreError::StoreUnreachable(_)));
    }

    #[tokio::test]
    async fn memory_store_merges_fields() {
        let store = MemorySecretStore::new();
        store
            .merge_update("web-tls", &sample_fields())
            .await
            .expect("ilk yazma");
        let mut update = SecretFields::new();
        update.insert("a.test.crt".to_string(), b"NEW".to_vec());
        update.insert("registration".to_string(), b"{}".to_vec());
        store.merge_update("web-tls", &update).await.expect("ikinci yazma");

        let secret = store.get("web-tls").await.expect("gizli nesne");
        assert_eq!(secret.len(), 3);
        assert_eq!(secret["a.test.crt"], b"NEW".to_vec());
        assert_eq!(secret["a.test.key"], b"KEY".to_vec());
        assert_eq!(store.write_count(), 2);
    }
}
