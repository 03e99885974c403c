use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p256::ecdsa::{
    Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey,
};
use p256::elliptic_curve;
use p256::SecretKey as P256SecretKey;
use rand_core::{CryptoRng, RngCore};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use signature::Error as SignatureError;
use thiserror::Error;
use url::Url;
use zeroize::Zeroizing;

use crate::nonce::ReplayNonce;

/// ACME JWS üretimi ve hesap anahtarı yükleme hataları.
#[derive(Debug, Error)]
pub enum JwsError {
    #[error("ACME kid değeri boş olamaz")]
    EmptyKid,
    #[error("ACME JWS yükü serileştirilemedi: {0}")]
    SerializePayload(#[from] serde_json::Error),
    #[error("hesap anahtarı PEM olarak okunamadı: {0}")]
    Pem(#[from] pem::PemError),
    #[error("desteklenmeyen hesap anahtarı türü: {0}")]
    UnsupportedKey(String),
    #[error("ACME ECDSA P-256 anahtarı geçersiz: {0}")]
    InvalidEcdsaKey(#[from] elliptic_curve::Error),
    #[error("ACME RSA anahtarı geçersiz: {0}")]
    InvalidRsaKey(#[from] rsa::errors::Error),
    #[error("PKCS#1 RSA anahtarı çözümlenemedi: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),
    #[error("ACME JWS imzası üretilemedi: {0}")]
    Signature(#[from] SignatureError),
}

/// Flattened JSON serileştirmesiyle imzalanmış ACME isteği (RFC 8555 §6.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcmeJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// Korumalı başlıkta hesabın nasıl tanıtılacağı.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBinding<'a> {
    /// Kayıtlı hesabın URL'si (`kid`).
    Kid(&'a str),
    /// `newAccount` isteklerinde olduğu gibi açık anahtarın kendisi.
    Jwk,
}

/// RSA PKCS#1 v1.5 (RS256) hesap anahtarı.
#[derive(Clone)]
pub struct RsaAccountKey {
    private_key: RsaPrivateKey,
    signing_key: RsaSigningKey<Sha256>,
}

impl fmt::Debug for RsaAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaAccountKey")
            .field("bits", &(self.private_key.size() * 8))
            .finish_non_exhaustive()
    }
}

impl RsaAccountKey {
    pub const ALGORITHM: &'static str = "RS256";

    /// Harici RNG ile verilen modül uzunluğunda anahtar üretir.
    ///
    /// # Errors
    ///
    /// Asal üretimi başarısız olursa `JwsError::InvalidRsaKey` döner.
    pub fn generate_with_rng(
        bits: usize,
        rng: &mut (impl CryptoRng + RngCore),
    ) -> Result<Self, JwsError> {
        Self::new(RsaPrivateKey::new(rng, bits)?)
    }

    /// # Errors
    ///
    /// Anahtar tutarlılık denetiminden geçemezse `JwsError::InvalidRsaKey` döner.
    pub fn new(private_key: RsaPrivateKey) -> Result<Self, JwsError> {
        private_key.validate()?;
        let signing_key = RsaSigningKey::<Sha256>::new(private_key.clone());
        Ok(Self {
            private_key,
            signing_key,
        })
    }

    fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    /// JWK üyeleri RFC 7638 sırasıyla (`e`, `kty`, `n`).
    #[must_use]
    pub fn jwk(&self) -> Value {
        let public = self.public_key();
        serde_json::json!({
            "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
            "kty": "RSA",
            "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
        })
    }

    #[must_use]
    pub fn jwk_thumbprint(&self) -> String {
        thumbprint_of(&self.jwk(), &["e", "kty", "n"])
    }

    fn sign(&self, signing_input: &[u8]) -> Result<Vec<u8>, JwsError> {
        let signature = signature::Signer::try_sign(&self.signing_key, signing_input)?;
        let bytes: Box<[u8]> = signature::SignatureEncoding::to_bytes(&signature);
        Ok(bytes.into_vec())
    }
}

/// ECDSA P-256 (ES256) hesap anahtarı.
#[derive(Clone)]
pub struct EcdsaP256AccountKey {
    signing_key: P256SigningKey,
}

impl fmt::Debug for EcdsaP256AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcdsaP256AccountKey").finish_non_exhaustive()
    }
}

impl EcdsaP256AccountKey {
    pub const ALGORITHM: &'static str = "ES256";

    #[must_use]
    pub fn generate_with_rng(rng: &mut (impl CryptoRng + RngCore)) -> Self {
        Self {
            signing_key: P256SigningKey::random(rng),
        }
    }

    #[must_use]
    pub fn from_secret_key(secret_key: &P256SecretKey) -> Self {
        Self {
            signing_key: P256SigningKey::from(secret_key),
        }
    }

    /// 32 baytlık büyük-endian skalerden anahtar oluşturur.
    ///
    /// # Errors
    ///
    /// Skaler eğri alanının dışındaysa `JwsError::InvalidEcdsaKey` döner.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, JwsError> {
        let secret_key = P256SecretKey::from_slice(bytes)?;
        Ok(Self::from_secret_key(&secret_key))
    }

    #[must_use]
    pub fn verifying_key(&self) -> P256VerifyingKey {
        *self.signing_key.verifying_key()
    }

    /// JWK üyeleri RFC 7638 sırasıyla (`crv`, `kty`, `x`, `y`).
    #[must_use]
    pub fn jwk(&self) -> Value {
        let point = self.verifying_key().to_encoded_point(false);
        let coordinate = |bytes: Option<&p256::FieldBytes>| {
            bytes.map(|value| URL_SAFE_NO_PAD.encode(value)).unwrap_or_default()
        };
        serde_json::json!({
            "crv": "P-256",
            "kty": "EC",
            "x": coordinate(point.x()),
            "y": coordinate(point.y()),
        })
    }

    #[must_use]
    pub fn jwk_thumbprint(&self) -> String {
        thumbprint_of(&self.jwk(), &["crv", "kty", "x", "y"])
    }

    fn secret_key(&self) -> P256SecretKey {
        P256SecretKey::from(&self.signing_key)
    }

    fn sign(&self, signing_input: &[u8]) -> Vec<u8> {
        let signature: P256Signature = signature::Signer::sign(&self.signing_key, signing_input);
        signature.to_bytes().to_vec()
    }
}

/// ACME hesabının asimetrik kimliği.
///
/// Anahtar yapılandırmadan PEM olarak gelir; hangi algoritmanın
/// kullanılacağı PEM etiketi ve içeriğinden çıkarılır.
#[derive(Debug, Clone)]
pub enum AccountKey {
    Rsa(RsaAccountKey),
    EcdsaP256(EcdsaP256AccountKey),
}

impl AccountKey {
    /// PEM kodlu özel anahtarı yükler.
    ///
    /// Kabul edilen etiketler: `RSA PRIVATE KEY` (PKCS#1), `EC PRIVATE KEY`
    /// (SEC1, yalnızca P-256) ve RSA ya da P-256 taşıyan `PRIVATE KEY` (PKCS#8).
    ///
    /// # Errors
    ///
    /// PEM bozuksa, etiket tanınmıyorsa veya anahtar geçersizse `JwsError` döner.
    pub fn from_pem(text: &str) -> Result<Self, JwsError> {
        let block = pem::parse(text.trim())?;
        let der = Zeroizing::new(block.contents().to_vec());
        match block.tag() {
            "RSA PRIVATE KEY" => {
                let key = RsaPrivateKey::from_pkcs1_der(&der)?;
                Ok(Self::Rsa(RsaAccountKey::new(key)?))
            }
            "EC PRIVATE KEY" => {
                let key = P256SecretKey::from_sec1_der(&der)?;
                Ok(Self::EcdsaP256(EcdsaP256AccountKey::from_secret_key(&key)))
            }
            "PRIVATE KEY" => {
                if let Ok(key) = <RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_der(&der)
                {
                    return Ok(Self::Rsa(RsaAccountKey::new(key)?));
                }
                <P256SecretKey as p256::pkcs8::DecodePrivateKey>::from_pkcs8_der(&der)
                    .map(|key| Self::EcdsaP256(EcdsaP256AccountKey::from_secret_key(&key)))
                    .map_err(|err| JwsError::UnsupportedKey(format!("PKCS#8: {err}")))
            }
            other => Err(JwsError::UnsupportedKey(other.to_owned())),
        }
    }

    /// Anahtarı `from_pem` ile tekrar okunabilecek PEM biçimine çevirir.
    ///
    /// # Errors
    ///
    /// DER kodlaması başarısız olursa `JwsError` döner.
    pub fn to_pem(&self) -> Result<Zeroizing<String>, JwsError> {
        match self {
            Self::Rsa(key) => Ok(key.private_key.to_pkcs1_pem(LineEnding::LF)?),
            Self::EcdsaP256(key) => Ok(key.secret_key().to_sec1_pem(LineEnding::LF)?),
        }
    }

    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        match self {
            Self::Rsa(_) => RsaAccountKey::ALGORITHM,
            Self::EcdsaP256(_) => EcdsaP256AccountKey::ALGORITHM,
        }
    }

    #[must_use]
    pub fn jwk(&self) -> Value {
        match self {
            Self::Rsa(key) => key.jwk(),
            Self::EcdsaP256(key) => key.jwk(),
        }
    }

    /// RFC 7638 JWK parmak izi; HTTP-01 anahtar yetkilendirmesinde kullanılır.
    #[must_use]
    pub fn thumbprint(&self) -> String {
        match self {
            Self::Rsa(key) => key.jwk_thumbprint(),
            Self::EcdsaP256(key) => key.jwk_thumbprint(),
        }
    }

    /// Ham yükü imzalar. Boş yük POST-as-GET isteği üretir.
    ///
    /// # Errors
    ///
    /// Boş `kid` verilirse veya imza üretilemezse `JwsError` döner.
    pub fn sign_payload(
        &self,
        payload: &[u8],
        nonce: &ReplayNonce,
        url: &Url,
        binding: KeyBinding<'_>,
    ) -> Result<AcmeJws, JwsError> {
        let protected = protected_header(self, nonce, url, binding)?;
        let protected = URL_SAFE_NO_PAD.encode(protected);
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signing_input = format!("{protected}.{payload}");
        let signature = match self {
            Self::Rsa(key) => key.sign(signing_input.as_bytes())?,
            Self::EcdsaP256(key) => key.sign(signing_input.as_bytes()),
        };
        Ok(AcmeJws {
            protected,
            payload,
            signature: URL_SAFE_NO_PAD.encode(signature),
        })
    }

    /// # Errors
    ///
    /// Yük serileştirilemezse veya imza üretilemezse `JwsError` döner.
    pub fn sign_json<T: Serialize>(
        &self,
        payload: &T,
        nonce: &ReplayNonce,
        url: &Url,
        binding: KeyBinding<'_>,
    ) -> Result<AcmeJws, JwsError> {
        let bytes = serde_json::to_vec(payload)?;
        self.sign_payload(&bytes, nonce, url, binding)
    }
}

#[derive(Serialize)]
struct ProtectedHeader<'a> {
    alg: &'static str,
    nonce: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Value>,
}

fn protected_header(
    key: &AccountKey,
    nonce: &ReplayNonce,
    url: &Url,
    binding: KeyBinding<'_>,
) -> Result<Vec<u8>, JwsError> {
    let (kid, jwk) = match binding {
        KeyBinding::Kid(value) => {
            let value = value.trim();
            if value.is_empty() {
                return Err(JwsError::EmptyKid);
            }
            (Some(value), None)
        }
        KeyBinding::Jwk => (None, Some(key.jwk())),
    };
    let header = ProtectedHeader {
        alg: key.algorithm(),
        nonce: nonce.as_str(),
        url: url.as_str(),
        kid,
        jwk,
    };
    Ok(serde_json::to_vec(&header)?)
}

// Üyeler base64url olduğundan kaçış gerekmez; sıralama çağıranın sorumluluğunda.
fn thumbprint_of(jwk: &Value, members: &[&str]) -> String {
    let body = members
        .iter()
        .map(|name| {
            let value = jwk.get(*name).and_then(Value::as_str).unwrap_or_default();
            format!("\"{name}\":\"{value}\"")
        })
        .collect::<Vec<_>>()
        .join(",");
    URL_SAFE_NO_PAD.encode(Sha256::digest(format!("{{{body}}}")))
}
