//! Run lifecycle tests against the mock transport.

use pipeline_common::RetryConfig;
use pipeline_vault::{
    ClientSettings, Configuration, CredentialPayload, LogLevel, LogSink, Method,
    RunLifecycleController, RunOutcome, RunRequest, RunState, ScopeChain, SecretBinding,
    StaticCredentialSource, VaultError,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{MockTransport, RecordingLogSink, fixtures};

fn approle() -> CredentialPayload {
    CredentialPayload::AppRole {
        role_id: "pipeline-role".to_string(),
        secret_id: SecretString::from("pipeline-secret"),
        mount: "approle".to_string(),
    }
}

fn controller(
    transport: &MockTransport,
    credentials: StaticCredentialSource,
    log: &Arc<RecordingLogSink>,
) -> RunLifecycleController {
    RunLifecycleController::new(
        Arc::new(transport.clone()),
        Arc::new(credentials),
        Arc::clone(log) as Arc<dyn LogSink>,
    )
    .with_settings(
        ClientSettings::default()
            .with_timeout(Duration::from_secs(7))
            .with_retry(RetryConfig::none()),
    )
}

#[tokio::test]
async fn test_scoped_credential_selects_strategy() {
    let transport = MockTransport::new()
        .post("auth/approle/login", 200, fixtures::auth_response("hvs.approle-issued", 1800))
        .get("secret/app", 200, fixtures::kv1_secret(&json!({"api_key": "k-1"})));
    let credentials = StaticCredentialSource::new()
        .with(
            "vault-cred",
            CredentialPayload::Token {
                token: SecretString::from("s.global"),
            },
        )
        .with_scoped("team-a/deploy", "vault-cred", approle());
    let log = Arc::new(RecordingLogSink::new());
    let mut run = controller(&transport, credentials, &log);

    let scopes = ScopeChain::new()
        .with_scope("team-a/deploy", Some(Configuration::new().with_fail_if_not_found(true)))
        .with_scope(
            "team-a",
            Some(
                Configuration::new()
                    .with_server_url("https://vault.example.com/")
                    .with_credential_id("vault-cred"),
            ),
        );
    let report = run
        .execute(
            RunRequest::new(scopes)
                .with_bindings(vec![SecretBinding::new("secret/app", "api_key", "API_KEY")]),
            |bound| async move {
                Ok(bound
                    .get("API_KEY")
                    .map(|v| v.expose_secret().to_string()))
            },
        )
        .await;

    assert_eq!(report.into_result().unwrap().as_deref(), Some("k-1"));
    assert_eq!(transport.count(Method::Post, "auth/approle/login"), 1);
    assert_eq!(transport.count(Method::Get, "auth/token/lookup-self"), 0);

    let read = transport
        .requests()
        .into_iter()
        .find(|r| r.path == "secret/app")
        .unwrap();
    assert_eq!(read.token.unwrap().expose_secret(), "hvs.approle-issued");
}

#[tokio::test]
async fn test_connect_options_follow_configuration() {
    let transport = MockTransport::new()
        .get("auth/token/lookup-self", 200, fixtures::token_lookup(600, false));
    let credentials = StaticCredentialSource::new().with(
        "vault-cred",
        CredentialPayload::Token {
            token: SecretString::from("s.token-value"),
        },
    );
    let log = Arc::new(RecordingLogSink::new());
    let mut run = controller(&transport, credentials, &log);

    let scopes = ScopeChain::new().with_scope(
        "job",
        Some(
            Configuration::new()
                .with_server_url("https://vault.internal:8200/")
                .with_credential_id("vault-cred")
                .with_skip_tls_verification(true)
                .with_namespace("team-a"),
        ),
    );
    run.configure(&scopes).unwrap();
    run.authenticate().await.unwrap();

    let options = &transport.connects()[0];
    assert_eq!(options.address, "https://vault.internal:8200");
    assert!(options.skip_tls_verification);
    assert_eq!(options.namespace.as_deref(), Some("team-a"));
    assert_eq!(options.timeout, Duration::from_secs(7));
}

#[tokio::test]
async fn test_refused_connection_terminates_without_requests() {
    let transport = MockTransport::new().refuse_connect();
    let credentials = StaticCredentialSource::new().with("vault-cred", approle());
    let log = Arc::new(RecordingLogSink::new());
    let mut run = controller(&transport, credentials, &log);

    let scopes = ScopeChain::new().with_scope(
        "job",
        Some(
            Configuration::new()
                .with_server_url("https://vault.example.com")
                .with_credential_id("vault-cred"),
        ),
    );
    run.configure(&scopes).unwrap();
    let err = run.authenticate().await.unwrap_err();

    assert!(matches!(err, VaultError::Connection { .. }));
    assert_eq!(run.state(), RunState::Terminated);
    assert!(transport.requests().is_empty());
    assert_eq!(log.at(LogLevel::Error).len(), 1);
}

#[tokio::test]
async fn test_unknown_credential_is_configuration_error() {
    let transport = MockTransport::new();
    let log = Arc::new(RecordingLogSink::new());
    let mut run = controller(&transport, StaticCredentialSource::new(), &log);

    let scopes = ScopeChain::new().with_scope(
        "job",
        Some(
            Configuration::new()
                .with_server_url("https://vault.example.com")
                .with_credential_id("nobody"),
        ),
    );
    let report: pipeline_vault::RunReport<()> = run
        .execute(RunRequest::new(scopes), |_| async { Ok(()) })
        .await;

    assert!(matches!(report.outcome, RunOutcome::Failed(VaultError::Configuration(_))));
    assert!(transport.connects().is_empty());
}

#[tokio::test]
async fn test_periodic_renewal_while_job_runs() {
    let transport = MockTransport::new()
        .get("auth/token/lookup-self", 200, fixtures::token_lookup(3600, true))
        .post("auth/token/renew-self", 200, fixtures::auth_response("s.renewable-12345", 7200));
    let credentials = StaticCredentialSource::new().with(
        "vault-cred",
        CredentialPayload::Token {
            token: SecretString::from("s.renewable-12345"),
        },
    );
    let log = Arc::new(RecordingLogSink::new());
    let mut run = controller(&transport, credentials, &log);

    let scopes = ScopeChain::new().with_scope(
        "job",
        Some(
            Configuration::new()
                .with_server_url("https://vault.example.com")
                .with_credential_id("vault-cred")
                .with_renew_enabled(true)
                .with_renew_interval_hours(2),
        ),
    );
    let request = RunRequest::new(scopes).with_renewal_period(Duration::from_millis(20));
    let report = run
        .execute(request, |_| async {
            tokio::time::sleep(Duration::from_millis(110)).await;
            Ok(())
        })
        .await;

    assert!(report.is_success());
    // one renewal right after login, then ticks while the job sleeps
    assert!(transport.count(Method::Post, "auth/token/renew-self") >= 3);
    let infos = log.at(LogLevel::Info);
    assert!(!infos.is_empty());
    assert!(infos.iter().all(|line| line == "Vault token ****12345 updated with new lease: 2 hours"));
}

#[tokio::test]
async fn test_renewal_period_ignored_when_renewal_disabled() {
    let transport = MockTransport::new()
        .get("auth/token/lookup-self", 200, fixtures::token_lookup(3600, true));
    let credentials = StaticCredentialSource::new().with(
        "vault-cred",
        CredentialPayload::Token {
            token: SecretString::from("s.token"),
        },
    );
    let log = Arc::new(RecordingLogSink::new());
    let mut run = controller(&transport, credentials, &log);

    let scopes = ScopeChain::new().with_scope(
        "job",
        Some(
            Configuration::new()
                .with_server_url("https://vault.example.com")
                .with_credential_id("vault-cred"),
        ),
    );
    let request = RunRequest::new(scopes).with_renewal_period(Duration::from_millis(5));
    let report = run
        .execute(request, |_| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(())
        })
        .await;

    assert!(report.is_success());
    assert_eq!(transport.count(Method::Post, "auth/token/renew-self"), 0);
}

#[tokio::test]
async fn test_cancellation_during_job_still_revokes() {
    let transport = MockTransport::new()
        .get("auth/token/lookup-self", 200, fixtures::token_lookup(3600, true))
        .get("database/creds/ro", 200, fixtures::dynamic_secret("database/creds/ro/x1", 600))
        .revoke(204);
    let credentials = StaticCredentialSource::new().with(
        "vault-cred",
        CredentialPayload::Token {
            token: SecretString::from("s.token"),
        },
    );
    let log = Arc::new(RecordingLogSink::new());
    let mut run = controller(&transport, credentials, &log);

    let (cancel, cancelled) = tokio::sync::oneshot::channel::<()>();
    let scopes = ScopeChain::new().with_scope(
        "job",
        Some(
            Configuration::new()
                .with_server_url("https://vault.example.com")
                .with_credential_id("vault-cred"),
        ),
    );
    let request = RunRequest::new(scopes)
        .with_bindings(vec![SecretBinding::new("database/creds/ro", "password", "DB_PASS")])
        .with_cancellation(async move {
            let _ = cancelled.await;
        });

    let report: pipeline_vault::RunReport<()> = run
        .execute(request, |_| async move {
            let _ = cancel.send(());
            std::future::pending().await
        })
        .await;

    assert!(matches!(report.outcome, RunOutcome::Cancelled));
    assert_eq!(transport.revoked_leases(), vec!["database/creds/ro/x1".to_string()]);
    assert_eq!(report.state, RunState::Terminated);
}
