use super::{CredentialStrategy, Mechanism, login_with, mount_path};
use crate::error::VaultResult;
use crate::session::Session;
use crate::transport::Connection;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

/// Username and password login.
pub struct UserPassAuth {
    username: String,
    password: SecretString,
    mount: String,
}

impl UserPassAuth {
    /// Log in as `username` on the default mount.
    #[must_use]
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
            mount: Mechanism::UserPass.default_mount().to_string(),
        }
    }

    /// Use a custom auth mount.
    #[must_use]
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }
}

#[async_trait]
impl CredentialStrategy for UserPassAuth {
    fn mechanism(&self) -> Mechanism {
        Mechanism::UserPass
    }

    async fn login(&self, connection: &dyn Connection) -> VaultResult<Session> {
        login_with(
            connection,
            Mechanism::UserPass,
            format!("auth/{}/login/{}", mount_path(&self.mount), self.username),
            json!({ "password": self.password.expose_secret() }),
        )
        .await
    }
}
