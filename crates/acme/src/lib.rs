#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

//! RFC 8555 ACME istemci yapı taşları: directory, nonce, JWS imzası,
//! hesap/sipariş/yetkilendirme nesneleri ve HTTP-01 yardımcıları.

mod account;
mod authorization;
mod certificates;
mod client;
mod directory;
mod jws;
mod nonce;
mod order;
mod problem;
mod validation;

pub use account::{Account, AccountContact, AccountContactError, AccountStatus, NewAccountRequest};
pub use authorization::{Authorization, AuthorizationStatus, Challenge, ChallengeKind, ChallengeStatus};
pub use certificates::{
    build_finalize_payload, CertificateChain, CertificateError, CertificateKeyKind,
    CertificateRequest, FinalizePayload,
};
pub use client::{AccountHandle, AcmeClient, AcmeClientError, OrderHandle};
pub use directory::{AcmeDirectory, AcmeDirectoryError, AcmeDirectoryMeta};
pub use jws::{AccountKey, AcmeJws, EcdsaP256AccountKey, JwsError, KeyBinding, RsaAccountKey};
pub use nonce::{NonceError, NoncePool, ReplayNonce, REPLAY_NONCE_HEADER};
pub use order::{
    NewOrderError, NewOrderRequest, Order, OrderIdentifier, OrderIdentifierError, OrderStatus,
};
pub use problem::{Problem, ProblemIdentifier, Subproblem};
pub use validation::{Http01KeyAuthorization, Http01ValidationError, HTTP01_PATH_PREFIX};
