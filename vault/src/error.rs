//! Vault error types using thiserror 2.0.
//!
//! [`VaultError`] is the run-level taxonomy; [`RequestFailure`] describes why
//! a single request against the server failed and is carried as the source
//! of the read, authentication, renewal and revoke variants.

use crate::credentials::Mechanism;
use crate::lifecycle::RunState;
use pipeline_common::{Retryable, TransportError};
use thiserror::Error;

/// Why one request against the secrets server failed.
#[derive(Error, Debug)]
pub enum RequestFailure {
    /// Nothing stored at the path
    #[error("secret not found")]
    NotFound,

    /// The path exists but lacks the requested key
    #[error("key '{0}' not found")]
    KeyNotFound(String),

    /// Token lacks the policy for this path, or credentials were refused
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other 4xx answer
    #[error("request rejected (status {status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Server-provided reason
        message: String,
    },

    /// Answer did not have the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Failure below the protocol layer
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RequestFailure {
    /// Whether this failure means the secret or key does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound | Self::KeyNotFound(_))
    }
}

impl Retryable for RequestFailure {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_retryable())
    }
}

/// Vault-specific errors.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Settings are missing or malformed
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Transport for the server could not be constructed
    #[error("Failed to connect to vault at {address}: {source}")]
    Connection {
        /// Configured server address
        address: String,
        /// Underlying transport failure
        source: TransportError,
    },

    /// Credential rejected or unusable for the selected mechanism
    #[error("Authentication with {mechanism} failed: {cause}")]
    Authentication {
        /// Mechanism that was attempted
        mechanism: Mechanism,
        /// Why it failed
        #[source]
        cause: RequestFailure,
    },

    /// An operation needed a session but none was established
    #[error("No authenticated vault session")]
    Unauthenticated,

    /// Secret read failed
    #[error("Could not read from vault at path {path}: {cause}")]
    SecretRead {
        /// Requested path
        path: String,
        /// Why it failed
        #[source]
        cause: RequestFailure,
    },

    /// Token renewal failed
    #[error("Failed to renew token: {0}")]
    Renewal(#[source] RequestFailure),

    /// Lease revocation failed
    #[error("Could not revoke vault lease ({lease_id}): {cause}")]
    LeaseRevoke {
        /// Lease that was not revoked
        lease_id: String,
        /// Why it failed
        #[source]
        cause: RequestFailure,
    },

    /// Transport error outside a specific operation
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Operation invoked in a state that does not allow it
    #[error("Illegal run state transition from {from} to {to}")]
    IllegalTransition {
        /// Current state
        from: RunState,
        /// Requested state
        to: RunState,
    },
}

/// Result type for Vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an authentication error.
    #[must_use]
    pub const fn authentication(mechanism: Mechanism, cause: RequestFailure) -> Self {
        Self::Authentication { mechanism, cause }
    }

    /// Create a secret read error.
    #[must_use]
    pub fn secret_read(path: impl Into<String>, cause: RequestFailure) -> Self {
        Self::SecretRead {
            path: path.into(),
            cause,
        }
    }

    /// Create a lease revoke error.
    #[must_use]
    pub fn lease_revoke(lease_id: impl Into<String>, cause: RequestFailure) -> Self {
        Self::LeaseRevoke {
            lease_id: lease_id.into(),
            cause,
        }
    }

    /// Whether this is a read of a missing path or key.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::SecretRead { cause, .. } if cause.is_not_found())
    }
}

impl Retryable for VaultError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::SecretRead { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = VaultError::secret_read("secret/app", RequestFailure::NotFound);
        assert_eq!(
            err.to_string(),
            "Could not read from vault at path secret/app: secret not found"
        );

        let err = VaultError::lease_revoke(
            "database/creds/ro/abc",
            RequestFailure::PermissionDenied("permission denied".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Could not revoke vault lease (database/creds/ro/abc): permission denied: permission denied"
        );
    }

    #[test]
    fn test_not_found_classification() {
        assert!(VaultError::secret_read("a", RequestFailure::NotFound).is_not_found());
        assert!(
            VaultError::secret_read("a", RequestFailure::KeyNotFound("k".to_string()))
                .is_not_found()
        );
        assert!(
            !VaultError::secret_read("a", RequestFailure::PermissionDenied(String::new()))
                .is_not_found()
        );
        assert!(!VaultError::configuration("no url").is_not_found());
    }

    #[test]
    fn test_retryable_errors() {
        let transient = VaultError::secret_read(
            "a",
            RequestFailure::Transport(TransportError::unavailable(503, "sealed")),
        );
        assert!(transient.is_retryable());
        assert!(!VaultError::secret_read("a", RequestFailure::NotFound).is_retryable());
        assert!(!VaultError::Unauthenticated.is_retryable());
    }

    #[test]
    fn test_source_chain_reaches_transport() {
        let err = VaultError::authentication(
            Mechanism::AppRole,
            RequestFailure::Transport(TransportError::Timeout("login".to_string())),
        );
        let cause = err.source().unwrap();
        assert_eq!(cause.to_string(), "Operation timed out: login");
    }
}
