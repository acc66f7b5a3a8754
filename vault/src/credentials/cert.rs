use super::{CredentialStrategy, Mechanism, login_with, mount_path};
use crate::error::VaultResult;
use crate::session::Session;
use crate::transport::{ClientIdentity, Connection};
use async_trait::async_trait;
use serde_json::json;

/// TLS certificate login.
///
/// The identity is presented during the handshake, so the access client
/// reconnects with [`CredentialStrategy::client_identity`] before calling
/// [`CredentialStrategy::login`].
pub struct CertificateAuth {
    identity: ClientIdentity,
    role: Option<String>,
    mount: String,
}

impl CertificateAuth {
    /// Log in with the given client identity.
    #[must_use]
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity,
            role: None,
            mount: Mechanism::Certificate.default_mount().to_string(),
        }
    }

    /// Restrict the login to one certificate role.
    #[must_use]
    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role.filter(|r| !r.is_empty());
        self
    }

    /// Use a custom auth mount.
    #[must_use]
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }
}

#[async_trait]
impl CredentialStrategy for CertificateAuth {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Certificate
    }

    fn client_identity(&self) -> Option<&ClientIdentity> {
        Some(&self.identity)
    }

    async fn login(&self, connection: &dyn Connection) -> VaultResult<Session> {
        let body = self
            .role
            .as_ref()
            .map_or_else(|| json!({}), |role| json!({ "name": role }));

        login_with(
            connection,
            Mechanism::Certificate,
            format!("auth/{}/login", mount_path(&self.mount)),
            body,
        )
        .await
    }
}
