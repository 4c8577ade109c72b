//! Backoff Policy Integration Tests
//!
//! Delay growth, ceiling and the attempt cutoff.

use std::time::Duration;

use myday::core::BackoffPolicy;
use myday::config::UploadSettings;

#[test]
fn test_delays_are_monotonic_and_capped() {
    let policies = [
        BackoffPolicy::default(),
        BackoffPolicy::new(Duration::from_millis(250), 3.0, Duration::from_secs(30), 10),
        BackoffPolicy::new(Duration::from_secs(7), 1.0, Duration::from_secs(7), 3),
        BackoffPolicy::new(Duration::from_secs(1), 0.25, Duration::from_secs(60), 3),
    ];

    for policy in policies {
        let mut previous = Duration::ZERO;
        for attempt in 1..=64 {
            let delay = policy.delay(attempt);
            assert!(
                delay >= previous,
                "delay({}) = {:?} < {:?} for {:?}",
                attempt,
                delay,
                previous,
                policy
            );
            assert!(delay <= policy.max_delay, "delay({}) exceeds ceiling", attempt);
            previous = delay;
        }
    }
}

#[test]
fn test_zero_attempt_has_no_delay() {
    assert_eq!(BackoffPolicy::default().delay(0), Duration::ZERO);
}

#[test]
fn test_ceiling_reached_exactly() {
    let policy = BackoffPolicy::new(Duration::from_secs(10), 2.0, Duration::from_secs(60), 5);

    assert_eq!(policy.delay(3), Duration::from_secs(40));
    assert_eq!(policy.delay(4), Duration::from_secs(60));
    assert_eq!(policy.delay(30), Duration::from_secs(60));
}

#[test]
fn test_configured_policy_is_explicit() {
    let settings = UploadSettings {
        initial_delay_secs: 2.0,
        multiplier: 3.0,
        max_delay_secs: 100.0,
        max_attempts: 4,
        request_timeout_secs: 10,
    };
    let policy = settings.backoff();

    assert_eq!(policy.delay(1), Duration::from_secs(2));
    assert_eq!(policy.delay(2), Duration::from_secs(6));
    assert_eq!(policy.delay(3), Duration::from_secs(18));
    assert!(!policy.is_exhausted(3));
    assert!(policy.is_exhausted(4));
}
