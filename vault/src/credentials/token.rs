use super::{CredentialStrategy, Mechanism};
use crate::error::{RequestFailure, VaultError, VaultResult};
use crate::secrets::TokenLookupData;
use crate::session::Session;
use crate::transport::{Connection, VaultRequest};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::debug;

/// Pre-issued token, validated with `auth/token/lookup-self`.
pub struct TokenAuth {
    token: SecretString,
}

impl TokenAuth {
    /// Wrap an existing token.
    #[must_use]
    pub const fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl CredentialStrategy for TokenAuth {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Token
    }

    async fn login(&self, connection: &dyn Connection) -> VaultResult<Session> {
        let fail = |cause: RequestFailure| VaultError::authentication(Mechanism::Token, cause);

        if self.token.expose_secret().trim().is_empty() {
            return Err(fail(RequestFailure::PermissionDenied(
                "token is empty".to_string(),
            )));
        }

        let reply = connection
            .send(VaultRequest::get("auth/token/lookup-self").with_token(&self.token))
            .await
            .map_err(|e| fail(e.into()))?;
        let mut body = reply.into_result().map_err(fail)?;
        let data = body
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or_default();

        let lookup: TokenLookupData = serde_json::from_value(data)
            .map_err(|e| fail(RequestFailure::Malformed(e.to_string())))?;
        debug!(ttl = lookup.ttl, renewable = lookup.renewable, "Token validated");

        Ok(
            Session::new(self.token.clone(), Duration::from_secs(lookup.ttl), lookup.renewable)
                .with_accessor(lookup.accessor)
                .with_policies(lookup.policies),
        )
    }
}
