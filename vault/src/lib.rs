//! Vault access layer for pipeline runs.
//!
//! Resolves Vault settings across nested scopes, authenticates once per run
//! with a pluggable credential strategy, binds secrets to environment
//! variable names, optionally renews the session token and revokes every
//! lease obtained during the run.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod binding;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod log_sink;
pub mod secrets;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use binding::{BindingReport, BoundSecret, MissingBinding, SecretBinding};
pub use client::AccessClient;
pub use config::{ClientSettings, Configuration, KvEngine, Scope, ScopeChain, normalize_url};
pub use credentials::{
    AppRoleAuth, CertificateAuth, CredentialPayload, CredentialSource, CredentialStrategy,
    KubernetesAuth, Mechanism, StaticCredentialSource, TokenAuth, UserPassAuth,
};
pub use error::{RequestFailure, VaultError, VaultResult};
pub use lifecycle::{Cancellation, RunLifecycleController, RunOutcome, RunReport, RunRequest, RunState};
pub use log_sink::{LogLevel, LogSink, TracingLogSink};
pub use secrets::{Lease, SecretResponse};
pub use session::{Session, mask_token};
pub use transport::{
    ClientIdentity, ConnectOptions, Connection, HttpTransport, Method, Transport, VaultReply,
    VaultRequest,
};
