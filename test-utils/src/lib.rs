//! Shared test utilities for the pipeline-vault crates.
//!
//! This crate provides:
//! - Proptest generators for configurations, URLs and leases
//! - A scriptable mock transport and a recording log sink
//! - Vault JSON response fixtures

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use generators::*;
pub use mocks::{MockTransport, RecordingLogSink};
