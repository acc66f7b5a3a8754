//! HTTP client configuration and building.
//!
//! Every connection to the secrets server goes through [`build_http_client`],
//! so TLS verification, client certificates and timeouts are applied the
//! same way for all authentication mechanisms.

use crate::TransportError;
use reqwest::{Client, ClientBuilder, Identity};
use std::time::Duration;
use url::Url;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout (default: 30s)
    pub timeout: Duration,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Accept any server certificate (default: false)
    pub skip_tls_verification: bool,
    /// PEM bundle holding a client certificate and its private key
    pub identity_pem: Option<Vec<u8>>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("pipeline-vault/", env!("CARGO_PKG_VERSION")).to_string(),
            skip_tls_verification: false,
            identity_pem: None,
        }
    }
}

impl HttpConfig {
    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Accept invalid server certificates.
    #[must_use]
    pub const fn with_skip_tls_verification(mut self, skip: bool) -> Self {
        self.skip_tls_verification = skip;
        self
    }

    /// Present the given PEM certificate and key during the TLS handshake.
    #[must_use]
    pub fn with_identity_pem(mut self, pem: Vec<u8>) -> Self {
        self.identity_pem = Some(pem);
        self
    }
}

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns [`TransportError::Tls`] if the client identity cannot be parsed
/// and [`TransportError::Http`] if the client cannot be built.
///
/// # Examples
///
/// ```
/// use pipeline_common::{HttpConfig, build_http_client};
/// use std::time::Duration;
///
/// let config = HttpConfig::default().with_timeout(Duration::from_secs(5));
/// let client = build_http_client(&config).expect("Failed to build client");
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<Client, TransportError> {
    let mut builder = ClientBuilder::new()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .use_rustls_tls()
        .danger_accept_invalid_certs(config.skip_tls_verification);

    if let Some(pem) = &config.identity_pem {
        let identity = Identity::from_pem(pem).map_err(|e| TransportError::Tls(e.to_string()))?;
        builder = builder.identity(identity);
    }

    builder.build().map_err(TransportError::Http)
}

/// Parse and validate a server address.
///
/// Only absolute `http` and `https` URLs with a host are accepted.
///
/// # Errors
///
/// Returns [`TransportError::InvalidAddress`] for anything else.
pub fn parse_address(address: &str) -> Result<Url, TransportError> {
    let url = Url::parse(address).map_err(|e| TransportError::invalid_address(address, e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(TransportError::invalid_address(
            address,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(TransportError::invalid_address(address, "missing host"));
    }

    Ok(url)
}
