use super::{CredentialStrategy, Mechanism, login_with, mount_path};
use crate::error::VaultResult;
use crate::session::Session;
use crate::transport::Connection;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

/// AppRole login with a role id and secret id.
pub struct AppRoleAuth {
    role_id: String,
    secret_id: SecretString,
    mount: String,
}

impl AppRoleAuth {
    /// Log in with the given role id and secret id on the default mount.
    #[must_use]
    pub fn new(role_id: impl Into<String>, secret_id: SecretString) -> Self {
        Self {
            role_id: role_id.into(),
            secret_id,
            mount: Mechanism::AppRole.default_mount().to_string(),
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
impl CredentialStrategy for AppRoleAuth {
    fn mechanism(&self) -> Mechanism {
        Mechanism::AppRole
    }

    async fn login(&self, connection: &dyn Connection) -> VaultResult<Session> {
        login_with(
            connection,
            Mechanism::AppRole,
            format!("auth/{}/login", mount_path(&self.mount)),
            json!({
                "role_id": self.role_id,
                "secret_id": self.secret_id.expose_secret(),
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RequestFailure, VaultError};
    use crate::test_support::Scripted;
    use crate::transport::Method;
    use std::time::Duration;

    #[tokio::test]
    async fn test_approle_login_posts_role_and_secret() {
        let connection = Scripted::new().reply(
            200,
            json!({"auth": {"client_token": "hvs.issued-12345", "lease_duration": 2764800, "renewable": true}}),
        );
        let auth = AppRoleAuth::new("role-1", SecretString::from("secret-1")).with_mount("/ci-approle/");

        let session = auth.login(&connection).await.unwrap();
        assert_eq!(session.masked_token(), "****12345");
        assert_eq!(session.lease_duration(), Duration::from_secs(2_764_800));

        let requests = connection.requests();
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].path, "auth/ci-approle/login");
        assert_eq!(
            requests[0].body,
            Some(json!({"role_id": "role-1", "secret_id": "secret-1"}))
        );
        assert!(requests[0].token.is_none());
    }

    #[tokio::test]
    async fn test_answer_without_auth_block_is_malformed() {
        let connection = Scripted::new().reply(200, json!({"data": {}}));
        let auth = AppRoleAuth::new("role-1", SecretString::from("secret-1"));

        let err = auth.login(&connection).await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::Authentication {
                cause: RequestFailure::Malformed(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_secret_id_is_rejected() {
        let connection = Scripted::new().reply(400, json!({"errors": ["invalid secret id"]}));
        let auth = AppRoleAuth::new("role-1", SecretString::from("wrong-secret"));

        let err = auth.login(&connection).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("approle"));
        assert!(text.contains("invalid secret id"));
        assert!(!text.contains("wrong-secret"));
    }
}
