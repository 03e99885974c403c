use std::fmt;

use serde::{Deserialize, Serialize};

const ACME_ERROR_PREFIX: &str = "urn:ietf:params:acme:error:";

/// CA'nın hata gövdesi (RFC 7807, RFC 8555 §6.7).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Subproblem>,
}

/// Çok alan adlı siparişlerde tek bir tanımlayıcıya ait alt hata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<ProblemIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Problem {
    /// `urn:ietf:params:acme:error:` önekinden sonraki kısa tür adı.
    #[must_use]
    pub fn acme_kind(&self) -> Option<&str> {
        self.problem_type.strip_prefix(ACME_ERROR_PREFIX)
    }

    #[must_use]
    pub fn is_bad_nonce(&self) -> bool {
        self.acme_kind() == Some("badNonce")
    }

    /// Kullanım koşullarının kabul edilmesi gibi insan müdahalesi gerektiren durumlar.
    #[must_use]
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self.acme_kind(),
            Some("userActionRequired" | "accountDoesNotExist" | "unauthorized")
        )
    }

    /// Yalnızca HTTP durum koduyla oluşturulan, gövdesiz hata.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        Self {
            problem_type: "about:blank".to_owned(),
            detail: None,
            status: Some(status),
            subproblems: Vec::new(),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.acme_kind().unwrap_or(&self.problem_type);
        match &self.detail {
            Some(detail) => write!(f, "{kind}: {detail}")?,
            None => f.write_str(kind)?,
        }
        for sub in &self.subproblems {
            let target = sub
                .identifier
                .as_ref()
                .map_or("?", |identifier| identifier.value.as_str());
            write!(
                f,
                "; {target}: {}",
                sub.detail.as_deref().unwrap_or(&sub.problem_type)
            )?;
        }
        Ok(())
    }
}
