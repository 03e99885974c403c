use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use autocert_acme::Http01KeyAuthorization;

/// HTTP-01 token → key authorization tablosu.
///
/// Sunucu ile sertifika alıcısı aynı tabloyu paylaşır; klonlar aynı
/// içeriği görür.
#[derive(Debug, Clone, Default)]
pub struct ChallengeResponder {
    tokens: Arc<RwLock<HashMap<String, String>>>,
}

impl ChallengeResponder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, authorization: &Http01KeyAuthorization) {
        self.tokens.write().await.insert(
            authorization.token().to_string(),
            authorization.key_authorization().to_string(),
        );
        debug!(token = authorization.token(), "challenge yayında");
    }

    pub async fn withdraw(&self, token: &str) {
        if self.tokens.write().await.remove(token).is_some() {
            debug!(token, "challenge kaldırıldı");
        }
    }

    pub async fn lookup(&self, token: &str) -> Option<String> {
        self.tokens.read().await.get(token).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TOKEN: &str = "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA";
    const THUMBPRINT: &str = "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs";

    #[tokio::test]
    async fn publish_lookup_withdraw() {
        let responder = ChallengeResponder::new();
        let shared = responder.clone();
        let authorization = Http01KeyAuthorization::new(TOKEN, THUMBPRINT).expect("yetki");

        responder.publish(&authorization).await;
        assert_eq!(
            shared.lookup(TOKEN).await,
            Some(format!("{TOKEN}.{THUMBPRINT}"))
        );
        assert_eq!(shared.len().await, 1);

        responder.withdraw(TOKEN).await;
        assert_eq!(shared.lookup(TOKEN).await, None);
        assert!(shared.is_empty().await);
    }
}
