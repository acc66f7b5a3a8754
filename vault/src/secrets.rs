//! Secret and lease types, plus the response shapes they are decoded from.

use crate::config::KvEngine;
use crate::error::RequestFailure;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Generic logical response envelope.
#[derive(Debug, Deserialize)]
pub struct LogicalResponse {
    /// Lease id; empty for static secrets
    #[serde(default)]
    pub lease_id: String,
    /// Lease duration in seconds
    #[serde(default)]
    pub lease_duration: u64,
    /// Whether the lease is renewable
    #[serde(default)]
    pub renewable: bool,
    /// Secret payload
    #[serde(default)]
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
    /// Token issued by a login or renewal
    #[serde(default)]
    pub auth: Option<AuthData>,
}

/// `auth` block returned by login and renew endpoints.
#[derive(Deserialize)]
pub struct AuthData {
    /// Issued token
    pub client_token: String,
    /// Token accessor
    #[serde(default)]
    pub accessor: String,
    /// Attached policies
    #[serde(default)]
    pub policies: Vec<String>,
    /// Token TTL in seconds
    #[serde(default)]
    pub lease_duration: u64,
    /// Whether the token is renewable
    #[serde(default)]
    pub renewable: bool,
}

impl fmt::Debug for AuthData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthData")
            .field("client_token", &"[REDACTED]")
            .field("accessor", &self.accessor)
            .field("policies", &self.policies)
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .finish()
    }
}

/// `data` block of `auth/token/lookup-self`.
#[derive(Debug, Deserialize)]
pub struct TokenLookupData {
    /// Token accessor
    #[serde(default)]
    pub accessor: String,
    /// Attached policies
    #[serde(default)]
    pub policies: Vec<String>,
    /// Remaining TTL in seconds
    #[serde(default)]
    pub ttl: u64,
    /// Whether the token is renewable
    #[serde(default)]
    pub renewable: bool,
}

/// Revocable grant attached to a dynamically generated secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Lease identifier
    pub id: String,
    /// Path the lease was obtained from
    pub path: String,
    /// Granted duration
    pub duration: Duration,
    /// Whether the lease can be renewed
    pub renewable: bool,
    /// When the read that produced it completed
    pub acquired_at: DateTime<Utc>,
}

/// Decoded secret read.
#[derive(Debug, Clone)]
pub struct SecretResponse {
    /// Path that was read
    pub path: String,
    /// Key-value secret data; non-string values hold their JSON text
    pub data: BTreeMap<String, SecretString>,
    /// Lease, for dynamically generated secrets
    pub lease: Option<Lease>,
}

impl SecretResponse {
    /// Decode a logical read.
    ///
    /// For [`KvEngine::V2`] the versioned envelope (`data.data`) is unwrapped.
    /// A read without data counts as not found.
    ///
    /// # Errors
    ///
    /// Returns [`RequestFailure::NotFound`] for empty answers and
    /// [`RequestFailure::Malformed`] for undecodable ones.
    pub fn decode(
        path: &str,
        engine: KvEngine,
        body: serde_json::Value,
    ) -> Result<Self, RequestFailure> {
        if body.is_null() {
            return Err(RequestFailure::NotFound);
        }
        let response: LogicalResponse =
            serde_json::from_value(body).map_err(|e| RequestFailure::Malformed(e.to_string()))?;

        let mut data = response.data.ok_or(RequestFailure::NotFound)?;
        if engine == KvEngine::V2 {
            data = match data.remove("data") {
                Some(serde_json::Value::Object(inner)) => inner,
                Some(serde_json::Value::Null) | None => return Err(RequestFailure::NotFound),
                Some(_) => {
                    return Err(RequestFailure::Malformed(
                        "versioned secret data is not an object".to_string(),
                    ));
                }
            };
        }

        let lease = (!response.lease_id.is_empty()).then(|| Lease {
            id: response.lease_id,
            path: path.to_string(),
            duration: Duration::from_secs(response.lease_duration),
            renewable: response.renewable,
            acquired_at: Utc::now(),
        });

        Ok(Self {
            path: path.to_string(),
            data: data
                .into_iter()
                .map(|(key, value)| (key, secret_value(value)))
                .collect(),
            lease,
        })
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SecretString> {
        self.data.get(key)
    }

    /// Lease id, for dynamically generated secrets.
    #[must_use]
    pub fn lease_id(&self) -> Option<&str> {
        self.lease.as_ref().map(|l| l.id.as_str())
    }
}

fn secret_value(value: serde_json::Value) -> SecretString {
    match value {
        serde_json::Value::String(s) => SecretString::from(s),
        other => SecretString::from(other.to_string()),
    }
}
