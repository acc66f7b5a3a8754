//! Vault access client: one authenticated session per run.

use crate::{
    config::KvEngine,
    credentials::CredentialStrategy,
    error::{RequestFailure, VaultError, VaultResult},
    log_sink::LogSink,
    secrets::{LogicalResponse, SecretResponse},
    session::Session,
    transport::{ConnectOptions, Connection, Transport, VaultRequest},
};
use pipeline_common::{RetryConfig, RetryPolicy};
use secrecy::ExposeSecret;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

const SECONDS_PER_HOUR: u64 = 3600;

/// Client bound to one server and, once authenticated, one session.
pub struct AccessClient {
    transport: Arc<dyn Transport>,
    options: ConnectOptions,
    connection: Box<dyn Connection>,
    session: Option<Session>,
    retry: RetryPolicy,
    log: Arc<dyn LogSink>,
}

impl AccessClient {
    /// Build a client for `options.address`. Performs no network round trip.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Connection`] when the address is malformed or
    /// the transport cannot be constructed.
    pub fn init(
        transport: Arc<dyn Transport>,
        options: ConnectOptions,
        log: Arc<dyn LogSink>,
    ) -> VaultResult<Self> {
        let connection = transport
            .connect(&options)
            .map_err(|source| VaultError::Connection {
                address: options.address.clone(),
                source,
            })?;

        Ok(Self {
            transport,
            options,
            connection,
            session: None,
            retry: RetryPolicy::default(),
            log,
        })
    }

    /// Use a custom retry policy for reads.
    #[must_use]
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = RetryPolicy::new(config);
        self
    }

    /// Server address this client talks to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.options.address
    }

    /// Current session, once authenticated.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Authenticate with `strategy`, replacing any existing session.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Authentication`] when the login is refused and
    /// [`VaultError::Connection`] when a client identity cannot be loaded.
    #[instrument(skip(self, strategy), fields(address = %self.options.address, mechanism = %strategy.mechanism()))]
    pub async fn authenticate(&mut self, strategy: &dyn CredentialStrategy) -> VaultResult<()> {
        if let Some(identity) = strategy.client_identity() {
            self.options = self.options.clone().with_client_identity(identity.clone());
            self.connection =
                self.transport
                    .connect(&self.options)
                    .map_err(|source| VaultError::Connection {
                        address: self.options.address.clone(),
                        source,
                    })?;
        }

        let session = strategy.login(self.connection.as_ref()).await?;
        info!(
            lease_secs = session.lease_duration().as_secs(),
            renewable = session.renewable(),
            "Authenticated with Vault"
        );
        self.session = Some(session);
        Ok(())
    }

    /// Read the secret at a raw logical path.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::SecretRead`]; see [`AccessClient::read_kv`].
    pub async fn read(&self, path: &str) -> VaultResult<SecretResponse> {
        self.read_kv(path, KvEngine::V1).await
    }

    /// Read the secret at `path` from a key-value engine of the given version.
    ///
    /// Transient failures are retried.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Unauthenticated`] without a session and
    /// [`VaultError::SecretRead`] naming `path` otherwise.
    #[instrument(skip(self), fields(address = %self.options.address))]
    pub async fn read_kv(&self, path: &str, engine: KvEngine) -> VaultResult<SecretResponse> {
        let data_path = engine.data_path(path);
        debug!(data_path, "Reading secret");

        self.retry
            .execute(|| self.read_once(path, &data_path, engine))
            .await
    }

    async fn read_once(
        &self,
        path: &str,
        data_path: &str,
        engine: KvEngine,
    ) -> VaultResult<SecretResponse> {
        let session = self.session.as_ref().ok_or(VaultError::Unauthenticated)?;
        let fail = |cause: RequestFailure| VaultError::secret_read(path, cause);

        let reply = self
            .connection
            .send(VaultRequest::get(data_path).with_token(session.token()))
            .await
            .map_err(|e| fail(e.into()))?;
        let body = reply.into_result().map_err(fail)?;

        SecretResponse::decode(path, engine, body).map_err(fail)
    }

    /// Renew the session token by `hours`.
    ///
    /// Never fails: errors are reported to the run log as a warning and
    /// yield `None`. On success the renewed lease duration is returned.
    #[instrument(skip(self), fields(address = %self.options.address))]
    pub async fn renew_token(&mut self, hours: u32) -> Option<Duration> {
        match self.try_renew(hours).await {
            Ok(session) => {
                let lease = session.lease_duration();
                self.log.info(&format!(
                    "Vault token {} updated with new lease: {hours} hours",
                    session.masked_token()
                ));
                self.session = Some(session);
                Some(lease)
            }
            Err(e) => {
                warn!(error = %e, "Token renewal failed");
                let message = match &e {
                    VaultError::Renewal(_) => e.to_string(),
                    other => format!("Failed to renew token: {other}"),
                };
                self.log.warn(&message);
                None
            }
        }
    }

    async fn try_renew(&self, hours: u32) -> VaultResult<Session> {
        let current = self.session.as_ref().ok_or(VaultError::Unauthenticated)?;

        let increment = u64::from(hours) * SECONDS_PER_HOUR;
        let reply = self
            .connection
            .send(
                VaultRequest::post("auth/token/renew-self", json!({ "increment": increment }))
                    .with_token(current.token()),
            )
            .await
            .map_err(|e| VaultError::Renewal(e.into()))?;
        let body = reply.into_result().map_err(VaultError::Renewal)?;

        let response: LogicalResponse = serde_json::from_value(body)
            .map_err(|e| VaultError::Renewal(RequestFailure::Malformed(e.to_string())))?;
        let mut auth = response.auth.ok_or_else(|| {
            VaultError::Renewal(RequestFailure::Malformed(
                "renewal answer carries no auth block".to_string(),
            ))
        })?;
        if auth.client_token.is_empty() {
            auth.client_token = current.token().expose_secret().to_string();
        }

        Ok(Session::from(auth))
    }

    /// Revoke one lease. Makes exactly one attempt.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::LeaseRevoke`] naming the lease.
    #[instrument(skip(self), fields(address = %self.options.address))]
    pub async fn revoke_lease(&self, lease_id: &str) -> VaultResult<()> {
        let fail = |cause: RequestFailure| VaultError::lease_revoke(lease_id, cause);
        let session = self.session.as_ref().ok_or(VaultError::Unauthenticated)?;

        let reply = self
            .connection
            .send(
                VaultRequest::put("sys/leases/revoke", json!({ "lease_id": lease_id }))
                    .with_token(session.token()),
            )
            .await
            .map_err(|e| fail(e.into()))?;
        reply.into_result().map_err(fail)?;

        debug!(lease_id, "Lease revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CertificateAuth, TokenAuth};
    use crate::log_sink::LogLevel;
    use crate::test_support::{Lines, Scripted};
    use crate::transport::{ClientIdentity, Method};
    use pipeline_common::TransportError;
    use secrecy::SecretString;

    const TOKEN: &str = "s.run-token-9f8e7";

    fn lookup_ok() -> serde_json::Value {
        json!({"data": {"ttl": 3600, "renewable": true}})
    }

    async fn authenticated(script: Scripted, log: Arc<Lines>) -> AccessClient {
        let script = script.reply(200, lookup_ok());
        let mut client = AccessClient::init(
            Arc::new(script),
            ConnectOptions::new("https://vault.example.com"),
            log,
        )
        .unwrap()
        .with_retry(RetryConfig::none());
        client
            .authenticate(&TokenAuth::new(SecretString::from(TOKEN)))
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn test_read_returns_secret_and_lease() {
        let script = Scripted::new();
        let client = authenticated(script.clone(), Arc::new(Lines::default())).await;
        let script = script.reply(
            200,
            json!({"lease_id": "lease-123", "lease_duration": 60, "renewable": true, "data": {"password": "pw"}}),
        );

        let secret = client.read("database/creds/ro").await.unwrap();
        assert_eq!(secret.lease_id(), Some("lease-123"));
        assert_eq!(secret.get("password").unwrap().expose_secret(), "pw");

        let requests = script.requests();
        let read = requests.last().unwrap();
        assert_eq!(read.method, Method::Get);
        assert_eq!(read.path, "database/creds/ro");
        assert_eq!(read.token.as_ref().unwrap().expose_secret(), TOKEN);
    }

    #[tokio::test]
    async fn test_read_kv2_rewrites_path() {
        let script = Scripted::new();
        let client = authenticated(script.clone(), Arc::new(Lines::default())).await;
        let script = script.reply(200, json!({"data": {"data": {"k": "v"}, "metadata": {}}}));

        let secret = client.read_kv("secret/app", KvEngine::V2).await.unwrap();
        assert_eq!(secret.path, "secret/app");
        assert_eq!(script.requests().last().unwrap().path, "secret/data/app");
    }

    #[tokio::test]
    async fn test_read_not_found_names_path() {
        let script = Scripted::new();
        let client = authenticated(script.clone(), Arc::new(Lines::default())).await;
        script.reply(404, json!({"errors": []}));

        let err = client.read("secret/missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("secret/missing"));
    }

    #[tokio::test]
    async fn test_read_retries_transient_failures() {
        let script = Scripted::new();
        let client = authenticated(script.clone(), Arc::new(Lines::default()))
            .await
            .with_retry(
                RetryConfig::default()
                    .with_max_retries(2)
                    .with_initial_delay(Duration::from_millis(1))
                    .without_jitter(),
            );
        let script = script
            .reply(503, json!({"errors": ["Vault is sealed"]}))
            .fail(TransportError::Timeout("read".to_string()))
            .reply(200, json!({"data": {"k": "v"}}));

        let secret = client.read("secret/app").await.unwrap();
        assert!(secret.get("k").is_some());
        // lookup-self plus three read attempts
        assert_eq!(script.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_read_does_not_retry_permission_denied() {
        let script = Scripted::new();
        let client = authenticated(script.clone(), Arc::new(Lines::default()))
            .await
            .with_retry(RetryConfig::default().with_initial_delay(Duration::from_millis(1)));
        let script = script.reply(403, json!({"errors": ["permission denied"]}));

        let err = client.read("secret/app").await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::SecretRead {
                cause: RequestFailure::PermissionDenied(_),
                ..
            }
        ));
        assert_eq!(script.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_read_without_session_is_unauthenticated() {
        let client = AccessClient::init(
            Arc::new(Scripted::new()),
            ConnectOptions::new("https://vault.example.com"),
            Arc::new(Lines::default()),
        )
        .unwrap();
        assert!(matches!(
            client.read("secret/app").await,
            Err(VaultError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_renew_logs_masked_token() {
        let script = Scripted::new();
        let log = Arc::new(Lines::default());
        let mut client = authenticated(script.clone(), Arc::clone(&log)).await;
        let script = script.reply(
            200,
            json!({"auth": {"client_token": TOKEN, "lease_duration": 7200, "renewable": true}}),
        );

        let lease = client.renew_token(2).await;
        assert_eq!(lease, Some(Duration::from_secs(7200)));
        assert_eq!(
            log.at(LogLevel::Info),
            vec!["Vault token ****9f8e7 updated with new lease: 2 hours".to_string()]
        );

        let renew = script.requests().pop().unwrap();
        assert_eq!(renew.path, "auth/token/renew-self");
        assert_eq!(renew.body, Some(json!({"increment": 7200})));
    }

    #[tokio::test]
    async fn test_renew_failure_is_warning() {
        let script = Scripted::new();
        let log = Arc::new(Lines::default());
        let mut client = authenticated(script.clone(), Arc::clone(&log)).await;
        script.reply(403, json!({"errors": ["permission denied"]}));

        assert_eq!(client.renew_token(1).await, None);
        let warnings = log.at(LogLevel::Warn);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Failed to renew token: "));
        assert!(!warnings[0].contains(TOKEN));
        assert!(client.session().is_some());
    }

    #[tokio::test]
    async fn test_revoke_lease_puts_lease_id() {
        let script = Scripted::new();
        let client = authenticated(script.clone(), Arc::new(Lines::default())).await;
        let script = script
            .reply(204, serde_json::Value::Null)
            .reply(400, json!({"errors": ["invalid lease"]}));

        client.revoke_lease("lease-123").await.unwrap();
        let err = client.revoke_lease("lease-456").await.unwrap_err();
        assert!(err.to_string().contains("lease-456"));

        let requests = script.requests();
        let revoke = &requests[1];
        assert_eq!(revoke.method, Method::Put);
        assert_eq!(revoke.path, "sys/leases/revoke");
        assert_eq!(revoke.body, Some(json!({"lease_id": "lease-123"})));
    }

    #[tokio::test]
    async fn test_certificate_auth_reconnects_with_identity() {
        let script = Scripted::new().reply(200, json!({"auth": {"client_token": "hvs.cert"}}));
        let mut client = AccessClient::init(
            Arc::new(script.clone()),
            ConnectOptions::new("https://vault.example.com"),
            Arc::new(Lines::default()),
        )
        .unwrap();

        let auth = CertificateAuth::new(ClientIdentity {
            certificate_pem: "cert".to_string(),
            key_pem: SecretString::from("key"),
        });
        client.authenticate(&auth).await.unwrap();

        let connects = script.connects();
        assert_eq!(connects.len(), 2);
        assert!(connects[0].client_identity.is_none());
        assert!(connects[1].client_identity.is_some());
    }

    #[test]
    fn test_init_maps_transport_failure() {
        let result = AccessClient::init(
            Arc::new(crate::transport::HttpTransport::default()),
            ConnectOptions::new("ftp://vault"),
            Arc::new(Lines::default()),
        );
        assert!(matches!(result, Err(VaultError::Connection { .. })));
    }
}
