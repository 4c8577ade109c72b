//! Exponential backoff for upload retries.
//!
//! `delay(attempt) = min(initial * multiplier^(attempt - 1), ceiling)` for
//! `attempt >= 1`, zero otherwise. The attempt cutoff is carried here as
//! configuration but consulted by the upload queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[serde(with = "secs_f64")]
    pub initial_delay: Duration,

    /// Growth factor per attempt (values below 1.0 are treated as 1.0)
    pub multiplier: f64,

    /// Upper bound on any single delay
    #[serde(with = "secs_f64")]
    pub max_delay: Duration,

    /// Dispatches allowed before an item fails terminally
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(900),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
            max_attempts,
        }
    }

    /// Delay to wait after the given (1-indexed) attempt failed
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());

        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// True once `attempt` dispatches have used up the budget
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

mod secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("delay must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
