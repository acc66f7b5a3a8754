//! Scoped Vault configuration and its merge rules.
//!
//! Every scope of a pipeline (job, folder, global) may carry a
//! [`Configuration`]. A run resolves its effective settings by merging the
//! innermost configuration with each enclosing one in turn.

use pipeline_common::RetryConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Strip exactly one trailing `/` from a server URL.
///
/// ```
/// use pipeline_vault::normalize_url;
///
/// assert_eq!(normalize_url(Some("https://vault.example.com/")).as_deref(), Some("https://vault.example.com"));
/// assert_eq!(normalize_url(None), None);
/// ```
#[must_use]
pub fn normalize_url(url: Option<&str>) -> Option<String> {
    url.map(|u| u.strip_suffix('/').unwrap_or(u).to_string())
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// KV secrets engine version used to lay out read paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum KvEngine {
    /// Plain logical read of the given path
    #[default]
    V1,
    /// Versioned KV: `<mount>/<rest>` is read as `<mount>/data/<rest>`
    V2,
}

impl TryFrom<u8> for KvEngine {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(format!("unsupported KV engine version {other}")),
        }
    }
}

impl From<KvEngine> for u8 {
    fn from(engine: KvEngine) -> Self {
        match engine {
            KvEngine::V1 => 1,
            KvEngine::V2 => 2,
        }
    }
}

impl KvEngine {
    /// Rewrite a logical path for this engine.
    #[must_use]
    pub fn data_path(self, path: &str) -> String {
        let path = path.trim_matches('/');
        match self {
            Self::V1 => path.to_string(),
            Self::V2 => match path.split_once('/') {
                Some((_, rest)) if rest.starts_with("data/") => path.to_string(),
                Some((mount, rest)) => format!("{mount}/data/{rest}"),
                None => path.to_string(),
            },
        }
    }
}

const fn default_fail_if_not_found() -> bool {
    true
}

fn deserialize_url<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_url(raw.as_deref()))
}

/// Vault settings attached to one scope.
///
/// Values are immutable once built; [`Configuration::merge_with_parent`]
/// returns a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(
        default,
        deserialize_with = "deserialize_url",
        skip_serializing_if = "Option::is_none"
    )]
    server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential_id: Option<String>,
    #[serde(default = "default_fail_if_not_found")]
    fail_if_not_found: bool,
    #[serde(default)]
    skip_tls_verification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renew_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renew_interval_hours: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    print_stack_trace: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    engine_version: Option<KvEngine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            server_url: None,
            credential_id: None,
            fail_if_not_found: true,
            skip_tls_verification: false,
            renew_enabled: None,
            renew_interval_hours: None,
            print_stack_trace: None,
            engine_version: None,
            namespace: None,
            timeout_ms: None,
        }
    }
}

impl Configuration {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server URL; one trailing `/` is stripped.
    #[must_use]
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = normalize_url(Some(&url.into()));
        self
    }

    /// Set the credential reference.
    #[must_use]
    pub fn with_credential_id(mut self, id: impl Into<String>) -> Self {
        self.credential_id = Some(id.into());
        self
    }

    /// Set whether a missing secret aborts the run.
    #[must_use]
    pub const fn with_fail_if_not_found(mut self, fail: bool) -> Self {
        self.fail_if_not_found = fail;
        self
    }

    /// Accept any server certificate.
    #[must_use]
    pub const fn with_skip_tls_verification(mut self, skip: bool) -> Self {
        self.skip_tls_verification = skip;
        self
    }

    /// Enable or disable token renewal.
    #[must_use]
    pub const fn with_renew_enabled(mut self, enabled: bool) -> Self {
        self.renew_enabled = Some(enabled);
        self
    }

    /// Set the renewal increment in hours.
    #[must_use]
    pub const fn with_renew_interval_hours(mut self, hours: u32) -> Self {
        self.renew_interval_hours = Some(hours);
        self
    }

    /// Log fatal errors with their full cause chain.
    #[must_use]
    pub const fn with_print_stack_trace(mut self, enabled: bool) -> Self {
        self.print_stack_trace = Some(enabled);
        self
    }

    /// Set the default KV engine version for reads.
    #[must_use]
    pub const fn with_engine_version(mut self, engine: KvEngine) -> Self {
        self.engine_version = Some(engine);
        self
    }

    /// Set the Vault namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the request timeout. A zero timeout leaves it unset.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.timeout_ms = (!timeout.is_zero()).then_some(ms.max(1));
        self
    }

    /// Server URL, without trailing slash.
    #[must_use]
    pub fn server_url(&self) -> Option<&str> {
        self.server_url.as_deref()
    }

    /// Credential reference.
    #[must_use]
    pub fn credential_id(&self) -> Option<&str> {
        self.credential_id.as_deref()
    }

    /// Whether a missing secret aborts the run.
    #[must_use]
    pub const fn fail_if_not_found(&self) -> bool {
        self.fail_if_not_found
    }

    /// Whether server certificates are accepted unchecked.
    #[must_use]
    pub const fn skip_tls_verification(&self) -> bool {
        self.skip_tls_verification
    }

    /// Whether token renewal is enabled, if set.
    #[must_use]
    pub const fn renew_enabled(&self) -> Option<bool> {
        self.renew_enabled
    }

    /// Renewal increment in hours, if set.
    #[must_use]
    pub const fn renew_interval_hours(&self) -> Option<u32> {
        self.renew_interval_hours
    }

    /// Whether to log full error chains, if set.
    #[must_use]
    pub const fn print_stack_trace(&self) -> Option<bool> {
        self.print_stack_trace
    }

    /// KV engine version, if set.
    #[must_use]
    pub const fn engine_version(&self) -> Option<KvEngine> {
        self.engine_version
    }

    /// Vault namespace, if set.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Request timeout, if set.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Merge with the enclosing scope's configuration.
    ///
    /// Blank or absent `server_url` and `credential_id`, and absent optional
    /// settings, are taken from `parent`. `fail_if_not_found` and
    /// `skip_tls_verification` always keep this scope's value.
    #[must_use]
    pub fn merge_with_parent(&self, parent: Option<&Self>) -> Self {
        let Some(parent) = parent else {
            return self.clone();
        };

        let mut result = self.clone();
        if is_blank(result.credential_id()) {
            result.credential_id.clone_from(&parent.credential_id);
        }
        if is_blank(result.server_url()) {
            result.server_url.clone_from(&parent.server_url);
        }
        result.renew_enabled = result.renew_enabled.or(parent.renew_enabled);
        result.renew_interval_hours = result.renew_interval_hours.or(parent.renew_interval_hours);
        result.print_stack_trace = result.print_stack_trace.or(parent.print_stack_trace);
        result.engine_version = result.engine_version.or(parent.engine_version);
        if result.namespace.is_none() {
            result.namespace.clone_from(&parent.namespace);
        }
        result.timeout_ms = result.timeout_ms.filter(|ms| *ms > 0).or(parent.timeout_ms);
        result
    }

    /// Whether renewal should run, and with which increment.
    #[must_use]
    pub fn renewal_hours(&self) -> Option<u32> {
        match (self.renew_enabled, self.renew_interval_hours) {
            (Some(true), Some(hours)) => Some(hours),
            _ => None,
        }
    }
}

/// One configuration-holding context of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Scope name, e.g. a folder path; used for credential lookup
    pub name: String,
    /// Vault settings declared at this scope, if any
    pub configuration: Option<Configuration>,
}

/// Scopes ordered from innermost to outermost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
}

impl ScopeChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next enclosing scope.
    #[must_use]
    pub fn with_scope(mut self, name: impl Into<String>, configuration: Option<Configuration>) -> Self {
        self.scopes.push(Scope {
            name: name.into(),
            configuration,
        });
        self
    }

    /// Name of the innermost scope.
    #[must_use]
    pub fn innermost_name(&self) -> Option<&str> {
        self.scopes.first().map(|s| s.name.as_str())
    }

    /// Scopes from innermost to outermost.
    #[must_use]
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Effective configuration: the innermost declared configuration merged
    /// once with every enclosing one, bottom-up.
    #[must_use]
    pub fn resolve(&self) -> Option<Configuration> {
        let mut declared = self.scopes.iter().filter_map(|s| s.configuration.as_ref());
        let innermost = declared.next()?.clone();
        Some(declared.fold(innermost, |effective, parent| {
            effective.merge_with_parent(Some(parent))
        }))
    }
}

/// Client tuning shared by every run.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Request timeout when the scope does not set one
    pub timeout: Duration,
    /// Retry policy for reads
    pub retry: RetryConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let timeout = std::env::var("VAULT_CLIENT_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or(DEFAULT_CLIENT_TIMEOUT, Duration::from_secs);
        let retry = std::env::var("VAULT_CLIENT_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or_else(RetryConfig::default, |n| RetryConfig::default().with_max_retries(n));

        Self { timeout, retry }
    }
}

impl ClientSettings {
    /// Set the default timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
