use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use http::header::{HeaderMap, ToStrError};
use thiserror::Error;

/// CA yanıtlarında taze nonce taşıyan başlık.
pub const REPLAY_NONCE_HEADER: &str = "Replay-Nonce";

/// Nonce ayrıştırma hataları.
#[derive(Debug, Error)]
pub enum NonceError {
    #[error("Replay-Nonce değeri boş")]
    Empty,
    #[error("Replay-Nonce base64url değil: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("Replay-Nonce başlığı metin olarak okunamadı: {0}")]
    InvalidHeader(#[from] ToStrError),
}

/// RFC 8555 §6.5 uyarınca tek kullanımlık, base64url kodlu nonce.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ReplayNonce(String);

impl ReplayNonce {
    /// Nonce değerini doğrular.
    ///
    /// # Errors
    ///
    /// Değer boşsa ya da base64url alfabesi dışına taşıyorsa `NonceError` döner.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, NonceError> {
        let candidate = value.as_ref().trim();
        if candidate.is_empty() {
            return Err(NonceError::Empty);
        }
        URL_SAFE_NO_PAD.decode(candidate)?;
        Ok(Self(candidate.to_owned()))
    }

    /// Yanıt başlıklarından nonce okur; başlık yoksa `None` döner.
    ///
    /// # Errors
    ///
    /// Başlık mevcut fakat geçersizse `NonceError` döner.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, NonceError> {
        headers
            .get(REPLAY_NONCE_HEADER)
            .map(|value| value.to_str().map_err(NonceError::from).and_then(Self::parse))
            .transpose()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ReplayNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReplayNonce").field(&self.0).finish()
    }
}

impl FromStr for ReplayNonce {
    type Err = NonceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Kullanılmamış nonce değerlerini tutan sınırlı havuz.
///
/// En yeni nonce önce tüketilir; kapasite dolduğunda en eski değer düşer.
#[derive(Debug, Clone)]
pub struct NoncePool {
    capacity: usize,
    entries: VecDeque<ReplayNonce>,
}

impl NoncePool {
    pub const DEFAULT_CAPACITY: usize = 4;

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Havuza nonce ekler; aynı değer ikinci kez eklenmez.
    pub fn push(&mut self, nonce: ReplayNonce) {
        if self.entries.contains(&nonce) {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(nonce);
    }

    /// Kullanılmak üzere en yeni nonce değerini havuzdan çıkarır.
    pub fn take(&mut self) -> Option<ReplayNonce> {
        self.entries.pop_back()
    }

    /// Bir CA yanıtındaki `Replay-Nonce` başlığını havuza aktarır.
    ///
    /// Geçersiz başlıklar sessizce yok sayılır; bir sonraki istek gerekirse
    /// `newNonce` üzerinden yeni değer alır.
    pub fn absorb(&mut self, headers: &HeaderMap) -> bool {
        match ReplayNonce::from_headers(headers) {
            Ok(Some(nonce)) => {
                self.push(nonce);
                true
            }
            Ok(None) | Err(_) => false,
        }
    }
}

impl Default for NoncePool {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}
