//! Transport abstraction and its reqwest implementation.
//!
//! A [`Transport`] turns [`ConnectOptions`] into a [`Connection`]; a
//! connection sends one [`VaultRequest`] at a time. Requests and replies are
//! opaque JSON beyond path, method, token and status.

use crate::error::RequestFailure;
use async_trait::async_trait;
use pipeline_common::{HttpConfig, TransportError, build_http_client, parse_address};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// HTTP verb of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        })
    }
}

/// One request against the `/v1/` API.
#[derive(Debug, Clone)]
pub struct VaultRequest {
    /// HTTP verb
    pub method: Method,
    /// Path below `/v1/`
    pub path: String,
    /// Session token, if the endpoint needs one
    pub token: Option<SecretString>,
    /// JSON body
    pub body: Option<serde_json::Value>,
}

impl VaultRequest {
    fn new(method: Method, path: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            method,
            path: path.into().trim_start_matches('/').to_string(),
            token: None,
            body,
        }
    }

    /// GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, None)
    }

    /// POST request with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, path, Some(body))
    }

    /// PUT request with a JSON body.
    #[must_use]
    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Put, path, Some(body))
    }

    /// Authenticate the request with a token.
    #[must_use]
    pub fn with_token(mut self, token: &SecretString) -> Self {
        self.token = Some(token.clone());
        self
    }
}

/// Raw answer: status and decoded body (`Null` when empty).
#[derive(Debug, Clone, PartialEq)]
pub struct VaultReply {
    /// HTTP status code
    pub status: u16,
    /// JSON body; non-JSON text is kept as a string
    pub body: serde_json::Value,
}

impl VaultReply {
    /// Create a reply.
    #[must_use]
    pub const fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    /// Classify the status, yielding the body on success.
    ///
    /// # Errors
    ///
    /// 404 is [`RequestFailure::NotFound`], 401/403 are permission denied,
    /// 429 and 5xx are transport-level (retryable), other 4xx are rejected.
    pub fn into_result(self) -> Result<serde_json::Value, RequestFailure> {
        match self.status {
            200..=299 => Ok(self.body),
            404 => Err(RequestFailure::NotFound),
            401 | 403 => Err(RequestFailure::PermissionDenied(self.error_message())),
            429 => Err(TransportError::RateLimited.into()),
            status if status >= 500 => {
                Err(TransportError::unavailable(status, self.error_message()).into())
            }
            status => Err(RequestFailure::Rejected {
                status,
                message: self.error_message(),
            }),
        }
    }

    fn error_message(&self) -> String {
        match &self.body {
            serde_json::Value::Object(map) => match map.get("errors") {
                Some(serde_json::Value::Array(errors)) if !errors.is_empty() => errors
                    .iter()
                    .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_string))
                    .collect::<Vec<_>>()
                    .join("; "),
                _ => self.body.to_string(),
            },
            serde_json::Value::String(text) => text.clone(),
            serde_json::Value::Null => format!("status {}", self.status),
            other => other.to_string(),
        }
    }
}

/// Client certificate presented during the TLS handshake.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// PEM-encoded certificate chain
    pub certificate_pem: String,
    /// PEM-encoded private key
    pub key_pem: SecretString,
}

impl ClientIdentity {
    fn pem_bundle(&self) -> Vec<u8> {
        format!(
            "{}\n{}\n",
            self.certificate_pem.trim_end(),
            self.key_pem.expose_secret().trim_end()
        )
        .into_bytes()
    }
}

/// Settings a connection is built from.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Server address, e.g. `https://vault.example.com:8200`
    pub address: String,
    /// Accept any server certificate
    pub skip_tls_verification: bool,
    /// Request timeout
    pub timeout: Duration,
    /// Vault namespace sent with every request
    pub namespace: Option<String>,
    /// TLS client identity
    pub client_identity: Option<ClientIdentity>,
}

impl ConnectOptions {
    /// Options for the given address with default settings.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            skip_tls_verification: false,
            timeout: Duration::from_secs(30),
            namespace: None,
            client_identity: None,
        }
    }

    /// Accept any server certificate.
    #[must_use]
    pub const fn with_skip_tls_verification(mut self, skip: bool) -> Self {
        self.skip_tls_verification = skip;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|n| !n.trim().is_empty());
        self
    }

    /// Present a client certificate.
    #[must_use]
    pub fn with_client_identity(mut self, identity: ClientIdentity) -> Self {
        self.client_identity = Some(identity);
        self
    }
}

/// Builds connections to the secrets server.
pub trait Transport: Send + Sync {
    /// Build a connection. Performs no network round trip.
    ///
    /// # Errors
    ///
    /// Fails when the address is malformed or the client cannot be built.
    fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>, TransportError>;
}

/// An established connection configuration.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one request.
    ///
    /// Non-2xx answers are returned as replies, not errors.
    async fn send(&self, request: VaultRequest) -> Result<VaultReply, TransportError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    base: HttpConfig,
}

impl HttpTransport {
    /// Transport using the given base HTTP settings.
    #[must_use]
    pub const fn new(base: HttpConfig) -> Self {
        Self { base }
    }
}

impl Transport for HttpTransport {
    fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>, TransportError> {
        let address = parse_address(&options.address)?;

        let mut config = self
            .base
            .clone()
            .with_timeout(options.timeout)
            .with_skip_tls_verification(options.skip_tls_verification);
        if let Some(identity) = &options.client_identity {
            config = config.with_identity_pem(identity.pem_bundle());
        }

        let client = build_http_client(&config)?;
        debug!(address = %address, skip_tls = options.skip_tls_verification, "Vault transport configured");

        Ok(Box::new(HttpConnection {
            client,
            address,
            namespace: options.namespace.clone(),
        }))
    }
}

struct HttpConnection {
    client: reqwest::Client,
    address: Url,
    namespace: Option<String>,
}

impl HttpConnection {
    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Connection for HttpConnection {
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn send(&self, request: VaultRequest) -> Result<VaultReply, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self
            .client
            .request(method, self.url(&request.path))
            .header("X-Vault-Request", "true");
        if let Some(token) = &request.token {
            builder = builder.header("X-Vault-Token", token.expose_secret());
        }
        if let Some(namespace) = &self.namespace {
            builder = builder.header("X-Vault-Namespace", namespace);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!(status, "Vault answered");

        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else if (200..300).contains(&status) {
            serde_json::from_str(&text)?
        } else {
            // proxies answer errors with HTML or plain text
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        Ok(VaultReply::new(status, body))
    }
}
