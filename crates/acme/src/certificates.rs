use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use pem::{EncodeConfig, LineEnding, Pem};
use rand_core::OsRng;
use rcgen::{CertificateParams, DnType, KeyPair};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use serde::Serialize;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("sertifika anahtarı üretilemedi: {0}")]
    KeyGeneration(String),
    #[error("CSR oluşturulamadı: {0}")]
    Csr(#[from] rcgen::Error),
    #[error("CSR için en az bir alan adı gerekir")]
    NoDomains,
    #[error("sertifika zinciri ayrıştırılamadı: {0}")]
    InvalidChain(String),
    #[error("sertifika zinciri boş")]
    EmptyChain,
}

/// Sertifikanın özel anahtar türü.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CertificateKeyKind {
    #[default]
    Rsa2048,
    EcdsaP256,
}

impl FromStr for CertificateKeyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rsa2048" | "rsa" => Ok(Self::Rsa2048),
            "ecdsa-p256" | "p256" | "ec256" => Ok(Self::EcdsaP256),
            other => Err(format!("bilinmeyen anahtar türü: {other}")),
        }
    }
}

impl fmt::Display for CertificateKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rsa2048 => "rsa2048",
            Self::EcdsaP256 => "ecdsa-p256",
        })
    }
}

impl CertificateKeyKind {
    fn generate(self) -> Result<KeyPair, CertificateError> {
        match self {
            Self::EcdsaP256 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
                .map_err(|err| CertificateError::KeyGeneration(err.to_string())),
            // rcgen RSA anahtarı üretemez; rsa ile üretip PKCS#8 üzerinden yüklenir.
            Self::Rsa2048 => {
                let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
                    .map_err(|err| CertificateError::KeyGeneration(err.to_string()))?;
                let der = private_key
                    .to_pkcs8_der()
                    .map_err(|err| CertificateError::KeyGeneration(err.to_string()))?;
                let pem = Zeroizing::new(pem::encode(&Pem::new("PRIVATE KEY", der.as_bytes())));
                KeyPair::from_pkcs8_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256)
                    .map_err(|err| CertificateError::KeyGeneration(err.to_string()))
            }
        }
    }
}

/// Taze bir sertifika anahtarı ve ona ait CSR.
pub struct CertificateRequest {
    csr_der: Vec<u8>,
    private_key_pem: Zeroizing<String>,
}

impl fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("csr_len", &self.csr_der.len())
            .finish_non_exhaustive()
    }
}

impl CertificateRequest {
    /// Verilen alan adları için anahtar üretir ve CSR imzalar.
    ///
    /// İlk alan adı konu CN'si olarak da yazılır.
    ///
    /// # Errors
    ///
    /// Liste boşsa, anahtar üretilemezse veya CSR serileştirilemezse
    /// `CertificateError` döner.
    pub fn generate(domains: &[String], kind: CertificateKeyKind) -> Result<Self, CertificateError> {
        let primary = domains.first().ok_or(CertificateError::NoDomains)?;
        let key_pair = kind.generate()?;
        let mut params = CertificateParams::new(domains.to_vec())?;
        params
            .distinguished_name
            .push(DnType::CommonName, primary.as_str());
        let csr = params.serialize_request(&key_pair)?;
        let csr_der: &[u8] = csr.der().as_ref();
        Ok(Self {
            csr_der: csr_der.to_vec(),
            private_key_pem: Zeroizing::new(key_pair.serialize_pem()),
        })
    }

    #[must_use]
    pub fn csr_der(&self) -> &[u8] {
        &self.csr_der
    }

    #[must_use]
    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }
}

/// `finalize` isteğinin yükü.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizePayload {
    pub csr: String,
}

fn encode_lf(block: &Pem) -> String {
    pem::encode_config(block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

#[must_use]
pub fn build_finalize_payload(csr_der: &[u8]) -> FinalizePayload {
    FinalizePayload {
        csr: URL_SAFE_NO_PAD.encode(csr_der),
    }
}

/// `application/pem-certificate-chain` olarak indirilen zincir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    certificates: Vec<String>,
}

impl CertificateChain {
    /// # Errors
    ///
    /// Gövde PEM değilse, `CERTIFICATE` dışında blok içeriyorsa veya boşsa
    /// `CertificateError` döner.
    pub fn from_pem(body: &str) -> Result<Self, CertificateError> {
        let blocks =
            pem::parse_many(body).map_err(|err| CertificateError::InvalidChain(err.to_string()))?;
        let mut certificates = Vec::with_capacity(blocks.len());
        for block in blocks {
            if block.tag() != "CERTIFICATE" {
                return Err(CertificateError::InvalidChain(format!(
                    "beklenmeyen PEM etiketi: {}",
                    block.tag()
                )));
            }
            certificates.push(encode_lf(&block));
        }
        if certificates.is_empty() {
            return Err(CertificateError::EmptyChain);
        }
        Ok(Self { certificates })
    }

    /// Uç (leaf) sertifika.
    #[must_use]
    pub fn leaf_pem(&self) -> &str {
        self.certificates.first().map_or("", String::as_str)
    }

    /// Leaf dışındaki ara sertifikalar; CA yalnızca leaf döndürdüyse `None`.
    #[must_use]
    pub fn issuer_pem(&self) -> Option<String> {
        let rest = self.certificates.get(1..)?;
        if rest.is_empty() {
            None
        } else {
            Some(rest.concat())
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}
