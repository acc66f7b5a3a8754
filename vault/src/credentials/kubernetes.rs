use super::{CredentialStrategy, Mechanism, login_with, mount_path};
use crate::error::{RequestFailure, VaultError, VaultResult};
use crate::session::Session;
use crate::transport::Connection;
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;

pub(super) const DEFAULT_JWT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Kubernetes service account login.
pub struct KubernetesAuth {
    role: String,
    jwt_path: PathBuf,
    mount: String,
}

impl KubernetesAuth {
    /// Log in as `role` with the pod's service account token.
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            jwt_path: PathBuf::from(DEFAULT_JWT_PATH),
            mount: Mechanism::Kubernetes.default_mount().to_string(),
        }
    }

    /// Read the service account token from another file.
    #[must_use]
    pub fn with_jwt_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.jwt_path = path.into();
        self
    }

    /// Use a custom auth mount.
    #[must_use]
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    async fn read_jwt(&self) -> VaultResult<String> {
        tokio::fs::read_to_string(&self.jwt_path)
            .await
            .map(|s| s.trim().to_string())
            .map_err(|e| {
                VaultError::authentication(
                    Mechanism::Kubernetes,
                    RequestFailure::Malformed(format!(
                        "failed to read JWT from {}: {e}",
                        self.jwt_path.display()
                    )),
                )
            })
    }
}

#[async_trait]
impl CredentialStrategy for KubernetesAuth {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Kubernetes
    }

    async fn login(&self, connection: &dyn Connection) -> VaultResult<Session> {
        let jwt = self.read_jwt().await?;

        login_with(
            connection,
            Mechanism::Kubernetes,
            format!("auth/{}/login", mount_path(&self.mount)),
            json!({ "jwt": jwt, "role": self.role }),
        )
        .await
    }
}
