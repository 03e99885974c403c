use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{ApiError, ServerError, SuccessBody};
use crate::state::AppState;

/// HTTP yönlendiricisini oluşturur.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/register", get(register))
        .route("/generate", get(generate))
        .route("/.well-known/acme-challenge/:token", get(acme_challenge))
        .with_state(state)
}

/// Verilen dinleyici üzerinde HTTP hizmetini çalıştırır.
///
/// # Errors
///
/// HTTP hizmeti başlatılamazsa `ServerError` döner.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    let address = listener.local_addr()?;
    info!(address = %address, instance = state.instance_id(), "autocert dinlemede");
    axum::serve(listener, build_router(state).into_make_service()).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthResponse<'a> {
    #[serde(rename = "Healthy")]
    healthy: bool,
    #[serde(rename = "Id")]
    id: &'a str,
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(HealthResponse {
        healthy: true,
        id: state.instance_id(),
    })
    .into_response()
}

async fn register(State(state): State<Arc<AppState>>) -> Result<Json<SuccessBody>, ApiError> {
    let registration = state.coordinator().ensure_registered().await?;
    Ok(Json(SuccessBody::new(format!(
        "hesap kayıtlı: {}",
        registration.uri
    ))))
}

async fn generate(State(state): State<Arc<AppState>>) -> Result<Json<SuccessBody>, ApiError> {
    let report = state
        .coordinator()
        .run_provisioning(state.request())
        .await?;
    Ok(Json(SuccessBody::new(format!(
        "{} için sertifika {} gizli nesnesine yazıldı ({} alan)",
        report.domains.join(", "),
        report.secret_name,
        report.fields.len()
    ))))
}

async fn acme_challenge(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Response {
    match state.responder().lookup(&token).await {
        Some(key_authorization) => {
            debug!(token = %token, "challenge yanıtlandı");
            (
                [(header::CONTENT_TYPE, "text/plain")],
                key_authorization,
            )
                .into_response()
        }
        None => {
            debug!(token = %token, "bilinmeyen challenge tokenı");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
