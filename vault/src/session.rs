//! Authenticated session handle.

use crate::secrets::AuthData;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::{Duration, Instant};

const VISIBLE_TOKEN_CHARS: usize = 5;

/// Mask a token for log output, keeping only its last five characters.
///
/// Tokens shorter than that are fully masked.
///
/// ```
/// use pipeline_vault::mask_token;
///
/// assert_eq!(mask_token("hvs.CAESIabcde"), "****abcde");
/// assert_eq!(mask_token("abc"), "****");
/// ```
#[must_use]
pub fn mask_token(token: &str) -> String {
    let count = token.chars().count();
    if count < VISIBLE_TOKEN_CHARS {
        return "****".to_string();
    }
    let suffix: String = token.chars().skip(count - VISIBLE_TOKEN_CHARS).collect();
    format!("****{suffix}")
}

/// Token issued by the server for one run.
#[derive(Clone)]
pub struct Session {
    token: SecretString,
    lease_duration: Duration,
    renewable: bool,
    accessor: Option<String>,
    policies: Vec<String>,
    obtained_at: Instant,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .field("accessor", &self.accessor)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session from a token and its lease characteristics.
    #[must_use]
    pub fn new(token: SecretString, lease_duration: Duration, renewable: bool) -> Self {
        Self {
            token,
            lease_duration,
            renewable,
            accessor: None,
            policies: Vec::new(),
            obtained_at: Instant::now(),
        }
    }

    /// Attach the token accessor.
    #[must_use]
    pub fn with_accessor(mut self, accessor: impl Into<String>) -> Self {
        let accessor = accessor.into();
        self.accessor = (!accessor.is_empty()).then_some(accessor);
        self
    }

    /// Attach the token policies.
    #[must_use]
    pub fn with_policies(mut self, policies: Vec<String>) -> Self {
        self.policies = policies;
        self
    }

    /// The session token.
    #[must_use]
    pub const fn token(&self) -> &SecretString {
        &self.token
    }

    /// Token masked for logging.
    #[must_use]
    pub fn masked_token(&self) -> String {
        mask_token(self.token.expose_secret())
    }

    /// Lease duration at issue time; zero for tokens without expiry.
    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Whether the token can be renewed.
    #[must_use]
    pub const fn renewable(&self) -> bool {
        self.renewable
    }

    /// Token accessor, when reported.
    #[must_use]
    pub fn accessor(&self) -> Option<&str> {
        self.accessor.as_deref()
    }

    /// Token policies, when reported.
    #[must_use]
    pub fn policies(&self) -> &[String] {
        &self.policies
    }

    /// Whether the lease has run out.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        !self.lease_duration.is_zero() && self.obtained_at.elapsed() >= self.lease_duration
    }
}

impl From<AuthData> for Session {
    fn from(auth: AuthData) -> Self {
        Self::new(
            SecretString::from(auth.client_token),
            Duration::from_secs(auth.lease_duration),
            auth.renewable,
        )
        .with_accessor(auth.accessor)
        .with_policies(auth.policies)
    }
}
