#![allow(clippy::module_name_repetitions)]

use std::env;

use thiserror::Error;
use tracing::subscriber::{set_global_default, SetGlobalDefaultError};
use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::layer::SubscriberExt;

const DEFAULT_FILTER: &str = "info";

/// Telemetri kurulumu sırasında oluşabilecek hatalar.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Log filtresi geçersizdir.
    #[error("log filtresi geçersiz: {0}")]
    InvalidFilter(#[from] ParseError),
    /// Global abonelik kurulamadı.
    #[error("tracing aboneliği kurulamadı: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Kurulan aboneliğin özeti; süreç boyunca tutulur.
#[must_use]
#[derive(Debug)]
pub struct TelemetryGuard {
    service: String,
    filter: String,
}

impl TelemetryGuard {
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Etkin log filtresi.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// Log filtresini seçer: önce `AUTOCERT_LOG`, sonra `RUST_LOG`, yoksa `info`.
pub(crate) fn resolve_filter<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("AUTOCERT_LOG")
        .or_else(|| lookup("RUST_LOG"))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Ortam değişkenlerinden tracing aboneliğini başlatır.
///
/// # Errors
///
/// Geçersiz log filtresi ya da abonelik kurulumu başarısız olursa hata döner.
pub fn init_tracing(service_name: &str) -> Result<TelemetryGuard, TelemetryError> {
    let filter = resolve_filter(|key| env::var(key).ok());
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_new(filter.as_str())?)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(SystemTime)
                .with_target(true),
        );
    set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    Ok(TelemetryGuard {
        service: service_name.to_string(),
        filter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn autocert_log_takes_precedence() {
        let filter = resolve_filter(lookup(&[
            ("AUTOCERT_LOG", "autocert_server=debug"),
            ("RUST_LOG", "warn"),
        ]));
        assert_eq!(filter, "autocert_server=debug");
    }

    #[test]
    fn falls_back_to_rust_log_then_info() {
        assert_eq!(resolve_filter(lookup(&[("RUST_LOG", "warn")])), "warn");
        assert_eq!(resolve_filter(lookup(&[])), "info");
        assert_eq!(resolve_filter(lookup(&[("AUTOCERT_LOG", "  ")])), "info");
    }
}
