//! Authentication mechanisms.
//!
//! A [`CredentialSource`] turns a credential reference into a
//! [`CredentialPayload`]; the payload's shape selects the
//! [`CredentialStrategy`] that logs in.

mod approle;
mod cert;
mod kubernetes;
mod source;
mod token;
mod userpass;

pub use approle::AppRoleAuth;
pub use cert::CertificateAuth;
pub use kubernetes::KubernetesAuth;
pub use source::{CredentialSource, StaticCredentialSource};
pub use token::TokenAuth;
pub use userpass::UserPassAuth;

use crate::error::{RequestFailure, VaultError, VaultResult};
use crate::secrets::LogicalResponse;
use crate::session::Session;
use crate::transport::{ClientIdentity, Connection, VaultRequest};
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;

/// Authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// Pre-issued token
    Token,
    /// Role id and secret id
    AppRole,
    /// Username and password
    UserPass,
    /// TLS client certificate
    Certificate,
    /// Kubernetes service account JWT
    Kubernetes,
}

impl Mechanism {
    /// Default mount path of the auth method.
    #[must_use]
    pub const fn default_mount(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::AppRole => "approle",
            Self::UserPass => "userpass",
            Self::Certificate => "cert",
            Self::Kubernetes => "kubernetes",
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_mount())
    }
}

/// Logs in against the server and yields a session.
#[async_trait]
pub trait CredentialStrategy: Send + Sync {
    /// Mechanism implemented by this strategy.
    fn mechanism(&self) -> Mechanism;

    /// TLS identity the connection must present before logging in.
    fn client_identity(&self) -> Option<&ClientIdentity> {
        None
    }

    /// Authenticate over `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Authentication`] when the server refuses the
    /// credential or the answer cannot be used.
    async fn login(&self, connection: &dyn Connection) -> VaultResult<Session>;
}

/// POST to a login endpoint and turn its `auth` block into a session.
pub(crate) async fn login_with(
    connection: &dyn Connection,
    mechanism: Mechanism,
    path: String,
    body: serde_json::Value,
) -> VaultResult<Session> {
    let fail = |cause: RequestFailure| VaultError::authentication(mechanism, cause);

    let reply = connection
        .send(VaultRequest::post(path, body))
        .await
        .map_err(|e| fail(e.into()))?;
    let body = reply.into_result().map_err(fail)?;

    let response: LogicalResponse =
        serde_json::from_value(body).map_err(|e| fail(RequestFailure::Malformed(e.to_string())))?;
    let auth = response
        .auth
        .ok_or_else(|| fail(RequestFailure::Malformed("login answer carries no auth block".to_string())))?;

    Ok(Session::from(auth))
}

fn mount_path(mount: &str) -> &str {
    mount.trim_matches('/')
}

fn secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn default_approle_mount() -> String {
    Mechanism::AppRole.default_mount().to_string()
}

fn default_userpass_mount() -> String {
    Mechanism::UserPass.default_mount().to_string()
}

fn default_cert_mount() -> String {
    Mechanism::Certificate.default_mount().to_string()
}

fn default_kubernetes_mount() -> String {
    Mechanism::Kubernetes.default_mount().to_string()
}

fn default_jwt_path() -> PathBuf {
    PathBuf::from(kubernetes::DEFAULT_JWT_PATH)
}

/// Concrete credential material resolved from a credential reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CredentialPayload {
    /// Pre-issued token
    Token {
        /// The token
        #[serde(deserialize_with = "secret")]
        token: SecretString,
    },
    /// AppRole login
    AppRole {
        /// Role id
        role_id: String,
        /// Secret id
        #[serde(deserialize_with = "secret")]
        secret_id: SecretString,
        /// Auth mount path
        #[serde(default = "default_approle_mount")]
        mount: String,
    },
    /// Username/password login
    UserPass {
        /// User name
        username: String,
        /// Password
        #[serde(deserialize_with = "secret")]
        password: SecretString,
        /// Auth mount path
        #[serde(default = "default_userpass_mount")]
        mount: String,
    },
    /// TLS certificate login
    Certificate {
        /// PEM certificate chain
        certificate_pem: String,
        /// PEM private key
        #[serde(deserialize_with = "secret")]
        key_pem: SecretString,
        /// Certificate role to log in against
        #[serde(default)]
        role: Option<String>,
        /// Auth mount path
        #[serde(default = "default_cert_mount")]
        mount: String,
    },
    /// Kubernetes service account login
    Kubernetes {
        /// Vault role
        role: String,
        /// Service account token file
        #[serde(default = "default_jwt_path")]
        jwt_path: PathBuf,
        /// Auth mount path
        #[serde(default = "default_kubernetes_mount")]
        mount: String,
    },
}

impl CredentialPayload {
    /// Mechanism this payload authenticates with.
    #[must_use]
    pub const fn mechanism(&self) -> Mechanism {
        match self {
            Self::Token { .. } => Mechanism::Token,
            Self::AppRole { .. } => Mechanism::AppRole,
            Self::UserPass { .. } => Mechanism::UserPass,
            Self::Certificate { .. } => Mechanism::Certificate,
            Self::Kubernetes { .. } => Mechanism::Kubernetes,
        }
    }

    /// Build the strategy matching this payload's shape.
    #[must_use]
    pub fn into_strategy(self) -> Box<dyn CredentialStrategy> {
        match self {
            Self::Token { token } => Box::new(TokenAuth::new(token)),
            Self::AppRole {
                role_id,
                secret_id,
                mount,
            } => Box::new(AppRoleAuth::new(role_id, secret_id).with_mount(mount)),
            Self::UserPass {
                username,
                password,
                mount,
            } => Box::new(UserPassAuth::new(username, password).with_mount(mount)),
            Self::Certificate {
                certificate_pem,
                key_pem,
                role,
                mount,
            } => Box::new(
                CertificateAuth::new(ClientIdentity {
                    certificate_pem,
                    key_pem,
                })
                .with_role(role)
                .with_mount(mount),
            ),
            Self::Kubernetes {
                role,
                jwt_path,
                mount,
            } => Box::new(
                KubernetesAuth::new(role)
                    .with_jwt_path(jwt_path)
                    .with_mount(mount),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shape_selects_strategy() {
        let cases = [
            (json!({"type": "token", "token": "s.abc"}), Mechanism::Token),
            (
                json!({"type": "appRole", "roleId": "r", "secretId": "s"}),
                Mechanism::AppRole,
            ),
            (
                json!({"type": "userPass", "username": "ci", "password": "pw"}),
                Mechanism::UserPass,
            ),
            (
                json!({"type": "certificate", "certificatePem": "c", "keyPem": "k"}),
                Mechanism::Certificate,
            ),
            (json!({"type": "kubernetes", "role": "ci"}), Mechanism::Kubernetes),
        ];

        for (value, expected) in cases {
            let payload: CredentialPayload = serde_json::from_value(value).unwrap();
            assert_eq!(payload.mechanism(), expected);
            assert_eq!(payload.into_strategy().mechanism(), expected);
        }
    }

    #[test]
    fn test_payload_defaults_mount() {
        let payload: CredentialPayload =
            serde_json::from_value(json!({"type": "appRole", "roleId": "r", "secretId": "s"}))
                .unwrap();
        assert!(matches!(payload, CredentialPayload::AppRole { ref mount, .. } if mount == "approle"));
    }

    #[test]
    fn test_payload_debug_redacts_secrets() {
        let payload: CredentialPayload = serde_json::from_value(
            json!({"type": "userPass", "username": "ci", "password": "hunter2-very-secret"}),
        )
        .unwrap();
        let debug = format!("{payload:?}");
        assert!(debug.contains("ci"));
        assert!(!debug.contains("hunter2-very-secret"));
    }

    #[test]
    fn test_mechanism_display() {
        assert_eq!(Mechanism::AppRole.to_string(), "approle");
        assert_eq!(Mechanism::Certificate.to_string(), "cert");
    }
}
