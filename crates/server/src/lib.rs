#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

//! Küme içinde çalışan ACME sertifika sağlayıcısı: hesabı kaydeder, HTTP-01
//! ile sertifika alır ve sonucu Kubernetes Secret nesnesine yazar.

mod account_store;
mod acquirer;
mod archive;
mod authority;
mod challenge;
mod config;
mod coordinator;
mod error;
mod registrar;
mod retry;
mod routes;
mod secret_store;
mod state;
mod telemetry;

pub use account_store::{
    AccountCredential, AccountStore, AccountStoreError, Registration, REGISTRATION_FIELD,
};
pub use acquirer::{AcquireError, Acquirer, CredentialBundle, PollPolicy};
pub use archive::CertificateArchive;
pub use authority::{
    AccountContext, AcmeAuthority, CaError, CertificateAuthority, RegisteredAccount,
};
pub use challenge::ChallengeResponder;
pub use config::{SecretStoreBackend, ServerConfig, DEFAULT_CA_SERVER};
pub use coordinator::{
    field_mapping, Coordinator, ProvisioningError, ProvisioningReport, ProvisioningRequest, Stage,
    StageFailure,
};
pub use error::{ApiError, ErrorBody, ServerError, SuccessBody};
pub use registrar::{Registrar, RegistrarError};
pub use retry::{
    run_with_retry, Backoff, RetryOutcome, RetryPolicy, Retryable, DEFAULT_DELAY,
    DEFAULT_MAX_ATTEMPTS,
};
pub use routes::{build_router, serve};
pub use secret_store::{
    KubernetesSecretStore, MemorySecretStore, SecretFields, SecretStore, StoreError,
};
pub use state::AppState;
pub use telemetry::{init_tracing, TelemetryError, TelemetryGuard};

#[cfg(test)]
mod testing;
