#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use autocert_server::{init_tracing, run_with_retry, serve, AppState, RetryOutcome, ServerConfig, ServerError};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "autocert başlatılamadı");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, ServerError> {
    let telemetry = init_tracing("autocert")?;
    info!(filter = telemetry.filter(), "telemetri başlatıldı");
    let config = ServerConfig::from_env()?;
    info!(config = ?config, "yapılandırma yüklendi");

    let listener = TcpListener::bind(config.listen()).await?;
    let state = Arc::new(AppState::try_new(&config).await?);
    let server = tokio::spawn(serve(listener, Arc::clone(&state)));

    if let Err(err) = state.request().validate() {
        error!(error = %err, "sertifika üretimi başlatılamaz");
        server.abort();
        return Ok(ExitCode::FAILURE);
    }
    if let Err(err) = state.coordinator().ensure_registered().await {
        error!(error = %err, "ACME hesabı kaydedilemedi");
        server.abort();
        return Ok(ExitCode::FAILURE);
    }

    let outcome = run_with_retry(config.retry_policy(), |_| {
        state.coordinator().run_provisioning(state.request())
    })
    .await;
    match &outcome {
        RetryOutcome::Succeeded { attempts } => info!(attempts, "sertifika üretildi"),
        RetryOutcome::Exhausted {
            attempts,
            last_error,
        } => {
            let reason = last_error
                .as_ref()
                .map_or_else(|| "bilinmiyor".to_string(), ToString::to_string);
            warn!(attempts, reason = %reason, "sertifika üretilemedi");
        }
    }

    server.abort();
    drop(telemetry);
    Ok(ExitCode::from(outcome.exit_code()))
}
