//! HTTP-level Vault double for end-to-end tests.
//!
//! [`VaultDouble`] wraps a `wiremock` server with the endpoints a pipeline
//! run touches, so tests exercise the real reqwest transport.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use pipeline_common::{TracingConfig, init_tracing};
use pipeline_vault::{Configuration, ScopeChain};
use serde_json::{Value, json};
use test_utils::fixtures;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Install a test subscriber once; later calls are ignored.
pub fn init_test_tracing() {
    init_tracing(&TracingConfig::default().with_log_level("debug"));
}

/// A Vault server double listening on a local port.
pub struct VaultDouble {
    server: MockServer,
}

impl VaultDouble {
    /// Start an empty server. Unmatched requests answer 404.
    pub async fn start() -> Self {
        init_test_tracing();
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base address, with a trailing slash as users often configure it.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}/", self.server.uri())
    }

    /// Scope chain pointing at this server with the given credential.
    #[must_use]
    pub fn scopes(&self, credential_id: &str, fail_if_not_found: bool) -> ScopeChain {
        ScopeChain::new().with_scope(
            "pipeline/job",
            Some(
                Configuration::new()
                    .with_server_url(self.address())
                    .with_credential_id(credential_id)
                    .with_fail_if_not_found(fail_if_not_found),
            ),
        )
    }

    /// Accept `token` at `auth/token/lookup-self`.
    pub async fn accept_token(&self, token: &str) {
        Mock::given(method("GET"))
            .and(path("/v1/auth/token/lookup-self"))
            .and(header("X-Vault-Token", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::token_lookup(3600, true)))
            .mount(&self.server)
            .await;
    }

    /// Reject every token lookup.
    pub async fn reject_tokens(&self) {
        Mock::given(method("GET"))
            .and(path("/v1/auth/token/lookup-self"))
            .respond_with(ResponseTemplate::new(403).set_body_json(fixtures::permission_denied()))
            .mount(&self.server)
            .await;
    }

    /// Issue `client_token` on an AppRole login with the given ids.
    pub async fn accept_approle(&self, role_id: &str, secret_id: &str, client_token: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .and(body_json(json!({"role_id": role_id, "secret_id": secret_id})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(fixtures::auth_response(client_token, 3600)),
            )
            .mount(&self.server)
            .await;
    }

    /// Serve `body` at `GET /v1/<secret_path>`.
    pub async fn serve(&self, secret_path: &str, status: u16, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/{secret_path}")))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Expect exactly `times` revokes of `lease_id`, answered with `status`.
    pub async fn expect_revoke(&self, lease_id: &str, status: u16, times: u64) {
        Mock::given(method("PUT"))
            .and(path("/v1/sys/leases/revoke"))
            .and(body_json(json!({ "lease_id": lease_id })))
            .respond_with(ResponseTemplate::new(status))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Requests received so far, as `METHOD /path`.
    pub async fn received(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| format!("{} {}", r.method, r.url.path()))
            .collect()
    }

    /// Verify every `expect` set on mounted mocks.
    pub async fn verify(&self) {
        self.server.verify().await;
    }
}
