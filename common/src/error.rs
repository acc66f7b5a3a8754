//! Transport-level error type.
//!
//! Every failure below the Vault protocol layer (address parsing, TLS setup,
//! HTTP exchange, body decoding, server-side unavailability) is reported as a
//! [`TransportError`], classified as retryable or not.

use thiserror::Error;

/// Failure talking to the secrets server.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The configured server address cannot be used
    #[error("Invalid server address '{address}': {reason}")]
    InvalidAddress {
        /// The rejected address
        address: String,
        /// Why it was rejected
        reason: String,
    },

    /// TLS material or settings were rejected while building the client
    #[error("TLS configuration rejected: {0}")]
    Tls(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Server answered with a 5xx status
    #[error("Server unavailable (status {status}): {message}")]
    Unavailable {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Server answered 429
    #[error("Rate limited")]
    RateLimited,

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl TransportError {
    /// Check if this error is retryable.
    ///
    /// Connection failures, timeouts, rate limiting and 5xx answers are
    /// transient. Address, TLS and decoding problems are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use pipeline_common::TransportError;
    ///
    /// assert!(TransportError::RateLimited.is_retryable());
    /// assert!(!TransportError::Tls("bad pem".to_string()).is_retryable());
    /// ```
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::RateLimited | Self::Timeout(_) => true,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::InvalidAddress { .. } | Self::Tls(_) | Self::Serialization(_) => false,
        }
    }

    /// Create an invalid address error.
    #[must_use]
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create an unavailable error for the given status.
    #[must_use]
    pub fn unavailable(status: u16, message: impl Into<String>) -> Self {
        Self::Unavailable {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(TransportError::RateLimited.is_retryable());
        assert!(TransportError::unavailable(503, "sealed").is_retryable());
        assert!(TransportError::Timeout("read".to_string()).is_retryable());
    }

    #[test]
    fn test_non_retryable_errors() {
        assert!(!TransportError::invalid_address("vault", "relative URL").is_retryable());
        assert!(!TransportError::Tls("no key".to_string()).is_retryable());

        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!TransportError::from(decode).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::unavailable(503, "Vault is sealed");
        assert_eq!(
            err.to_string(),
            "Server unavailable (status 503): Vault is sealed"
        );

        let err = TransportError::invalid_address("::", "relative URL without a base");
        assert_eq!(
            err.to_string(),
            "Invalid server address '::': relative URL without a base"
        );
    }
}
