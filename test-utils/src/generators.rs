//! Shared proptest generators.
//!
//! Reusable generators for the domain types of the pipeline-vault crates.

use pipeline_vault::{Configuration, KvEngine, SecretBinding};
use proptest::prelude::*;
use std::time::Duration;

/// Generate server URLs with at most one trailing slash.
pub fn server_url_strategy() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just("http"), Just("https")],
        "[a-z][a-z0-9-]{0,15}(\\.[a-z]{2,6}){0,2}",
        proptest::option::of(1024u16..65535),
        any::<bool>(),
    )
        .prop_map(|(scheme, host, port, trailing)| {
            let port = port.map(|p| format!(":{p}")).unwrap_or_default();
            let slash = if trailing { "/" } else { "" };
            format!("{scheme}://{host}{port}{slash}")
        })
}

/// Generate credential references, including blank ones.
pub fn credential_id_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some(String::new())),
        Just(Some("   ".to_string())),
        "[a-z][a-z0-9-]{2,20}".prop_map(Some),
    ]
}

/// Generate KV engine versions.
pub fn kv_engine_strategy() -> impl Strategy<Value = KvEngine> {
    prop_oneof![Just(KvEngine::V1), Just(KvEngine::V2)]
}

/// Generate scope configurations covering every field.
pub fn configuration_strategy() -> impl Strategy<Value = Configuration> {
    (
        proptest::option::of(server_url_strategy()),
        credential_id_strategy(),
        any::<bool>(),
        any::<bool>(),
        proptest::option::of(any::<bool>()),
        proptest::option::of(1u32..=72),
        proptest::option::of(any::<bool>()),
        proptest::option::of(kv_engine_strategy()),
        proptest::option::of(namespace_strategy()),
        proptest::option::of(1u64..=120),
    )
        .prop_map(
            |(url, credential, fail, skip_tls, renew, hours, trace, engine, namespace, timeout)| {
                let mut config = Configuration::new()
                    .with_fail_if_not_found(fail)
                    .with_skip_tls_verification(skip_tls);
                if let Some(url) = url {
                    config = config.with_server_url(url);
                }
                if let Some(credential) = credential {
                    config = config.with_credential_id(credential);
                }
                if let Some(renew) = renew {
                    config = config.with_renew_enabled(renew);
                }
                if let Some(hours) = hours {
                    config = config.with_renew_interval_hours(hours);
                }
                if let Some(trace) = trace {
                    config = config.with_print_stack_trace(trace);
                }
                if let Some(engine) = engine {
                    config = config.with_engine_version(engine);
                }
                if let Some(namespace) = namespace {
                    config = config.with_namespace(namespace);
                }
                if let Some(timeout) = timeout {
                    config = config.with_timeout(Duration::from_secs(timeout));
                }
                config
            },
        )
}

/// Generate valid secret paths.
pub fn secret_path_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}(/[a-z][a-z0-9-]{0,20}){1,3}"
}

/// Generate lease ids as issued for dynamic secrets.
pub fn lease_id_strategy() -> impl Strategy<Value = String> {
    ("[a-z]{3,10}", "[a-z]{2,10}", "[A-Za-z0-9]{8,24}")
        .prop_map(|(engine, role, id)| format!("{engine}/creds/{role}/{id}"))
}

/// Generate distinct lease ids.
pub fn lease_ids_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    proptest::collection::hash_set(lease_id_strategy(), 0..=max)
        .prop_map(|ids| ids.into_iter().collect())
}

/// Generate bindings for one secret.
pub fn binding_strategy() -> impl Strategy<Value = SecretBinding> {
    (secret_path_strategy(), "[a-z_]{1,12}", "[A-Z][A-Z0-9_]{1,15}")
        .prop_map(|(path, key, env_var)| SecretBinding::new(path, key, env_var))
}

/// Generate tokens of any length, including very short ones.
pub fn token_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9.]{0,48}"
}

/// Generate TTL values (1 minute to 24 hours).
pub fn ttl_strategy() -> impl Strategy<Value = Duration> {
    (60u64..86400).prop_map(Duration::from_secs)
}

/// Generate valid namespace names.
pub fn namespace_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{2,20}"
}

/// Generate HTTP status codes of failed Vault answers.
pub fn failure_status_strategy() -> impl Strategy<Value = u16> {
    prop_oneof![
        Just(400u16),
        Just(401u16),
        Just(403u16),
        Just(404u16),
        Just(429u16),
        Just(500u16),
        Just(502u16),
        Just(503u16),
    ]
}
