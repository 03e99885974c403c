use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::account_store::AccountStoreError;
use crate::coordinator::ProvisioningError;
use crate::secret_store::StoreError;
use crate::telemetry::TelemetryError;

/// Süreç düzeyindeki hatalar.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Yapılandırma hatası.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// I/O hatası.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    AccountStore(#[from] AccountStoreError),
    #[error(transparent)]
    SecretStore(#[from] StoreError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// `{"Error": ..., "Data": {...}}` hata zarfı.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "Error")]
    pub error: String,
    #[serde(rename = "Data", skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<&'static str, String>,
}

impl ErrorBody {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            data: BTreeMap::new(),
        }
    }

    /// Hangi aşamada başarısız olunduğunu da taşıyan gövde.
    pub fn stage(message: impl Into<String>, stage: &str, reason: impl Into<String>) -> Self {
        let mut data = BTreeMap::new();
        data.insert("stage", stage.to_owned());
        data.insert("reason", reason.into());
        Self {
            error: message.into(),
            data,
        }
    }
}

/// `{"Success": true, "Message": ...}` başarı gövdesi.
#[derive(Debug, Serialize)]
pub struct SuccessBody {
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "Message")]
    pub message: String,
}

impl SuccessBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// HTTP düzeyinde hata türü.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    #[must_use]
    pub const fn new(status: StatusCode, body: ErrorBody) -> Self {
        Self { status, body }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorBody::message(message))
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, ErrorBody::message(message))
    }

    pub fn stage_failed(stage: &str, reason: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            ErrorBody::stage("provisioning failed", stage, reason),
        )
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ProvisioningError> for ApiError {
    fn from(err: ProvisioningError) -> Self {
        match &err {
            ProvisioningError::InvalidRequest(_) => Self::invalid_request(err.to_string()),
            ProvisioningError::Busy => Self::busy(err.to_string()),
            ProvisioningError::Stage { stage, cause } => {
                Self::stage_failed(stage.as_str(), cause.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let Self { status, body } = self;
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn stage_body_carries_stage_and_reason() {
        let body = ErrorBody::stage("provisioning failed", "acquirer", "timeout");
        assert_eq!(
            serde_json::to_value(&body).expect("json"),
            json!({
                "Error": "provisioning failed",
                "Data": {"reason": "timeout", "stage": "acquirer"}
            })
        );
    }

    #[test]
    fn plain_body_omits_data() {
        let body = ErrorBody::message("busy");
        assert_eq!(serde_json::to_value(&body).expect("json"), json!({"Error": "busy"}));
    }

    #[test]
    fn provisioning_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from(ProvisioningError::Busy).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ProvisioningError::InvalidRequest("DOMAINS boş".to_owned())).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
