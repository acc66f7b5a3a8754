//! Property-based tests for pipeline-common.

use pipeline_common::{RetryConfig, RetryPolicy, TransportError, parse_address};
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_retryable_errors_are_consistent(
        msg in "[a-zA-Z0-9 ]{1,50}",
        status in 500u16..600,
    ) {
        let retryable = vec![
            TransportError::RateLimited,
            TransportError::unavailable(status, msg.clone()),
            TransportError::Timeout(msg.clone()),
        ];
        for err in retryable {
            prop_assert!(err.is_retryable(), "Error {:?} should be retryable", err);
        }

        let permanent = vec![
            TransportError::invalid_address(msg.clone(), "bad"),
            TransportError::Tls(msg.clone()),
        ];
        for err in permanent {
            prop_assert!(!err.is_retryable(), "Error {:?} should not be retryable", err);
        }
    }

    /// Backoff never exceeds the configured cap and never shrinks.
    #[test]
    fn prop_backoff_is_monotonic_and_capped(
        initial_ms in 1u64..500,
        cap_ms in 500u64..10_000,
        attempt in 0u32..16,
    ) {
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .without_jitter()
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(cap_ms)),
        );

        let current = policy.delay_for_attempt(attempt);
        let next = policy.delay_for_attempt(attempt + 1);

        prop_assert!(current <= Duration::from_millis(cap_ms));
        prop_assert!(next >= current);
    }

    #[test]
    fn prop_https_addresses_parse(
        host in "[a-z][a-z0-9-]{0,20}(\\.[a-z][a-z0-9-]{0,10}){0,3}",
        port in 1u16..65535,
    ) {
        let address = format!("https://{host}:{port}");
        let url = parse_address(&address).unwrap();
        prop_assert_eq!(url.host_str(), Some(host.as_str()));
    }
}
