//! Shared plumbing for the pipeline Vault crates.
//!
//! This crate provides:
//! - Transport error type with retryability classification
//! - HTTP client configuration with TLS verification and client identity options
//! - Retry policy with exponential backoff
//! - Tracing subscriber initialisation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod http;
pub mod retry;
pub mod tracing_config;

pub use error::TransportError;
pub use http::{HttpConfig, build_http_client, parse_address};
pub use retry::{RetryConfig, RetryPolicy, Retryable};
pub use tracing_config::{TracingConfig, init_tracing};
