//! # Admission Retry
//!
//! Caller-side backoff around `ConcurrencyGovernor::try_acquire`. The
//! governor itself never retries; executors that want to ride out short
//! throttling bursts wrap their acquire in `acquire_with_retry`.

use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::errors::{RoutingError, RoutingResult};
use super::governor::{ConcurrencyGovernor, Permit};

/// Exponential backoff with full jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    1_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    pub fn validate(&self) -> RoutingResult<()> {
        if self.max_attempts == 0 {
            return Err(RoutingError::InvalidArgument(
                "retry.max_attempts must be >= 1".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(RoutingError::InvalidArgument(
                "retry.max_delay_ms must be >= retry.base_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Upper bound of the sleep after failed attempt `attempt` (0-based)
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Jittered sleep in `[0, ceiling(attempt)]`
    pub fn backoff<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(0..=ceiling))
    }
}

/// Acquire a permit, retrying throttles under `policy`
///
/// Any error other than a throttle is returned immediately.
pub fn acquire_with_retry<R: Rng + ?Sized>(
    governor: &ConcurrencyGovernor,
    function: &str,
    policy: &RetryPolicy,
    rng: &mut R,
) -> RoutingResult<Permit> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match governor.try_acquire(function) {
            Ok(permit) => return Ok(permit),
            Err(err) if err.is_throttle() && attempt + 1 < attempts => {
                let delay = policy.backoff(attempt, rng);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::RoutingMetrics;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    #[test]
    fn test_ceiling_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 10,
            max_delay_ms: 100,
        };
        assert_eq!(policy.ceiling(0), Duration::from_millis(10));
        assert_eq!(policy.ceiling(2), Duration::from_millis(40));
        assert_eq!(policy.ceiling(5), Duration::from_millis(100));
        assert_eq!(policy.ceiling(63), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_within_ceiling() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(5);
        for attempt in 0..6 {
            assert!(policy.backoff(attempt, &mut rng) <= policy.ceiling(attempt));
        }
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(instant(0).validate().is_err());
        let inverted = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 100,
            max_delay_ms: 10,
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let gov = ConcurrencyGovernor::new(10, Arc::new(RoutingMetrics::new()));
        gov.set_reserved_limit("orders", 1).unwrap();
        let _held = gov.try_acquire("orders").unwrap();

        let mut rng = StdRng::seed_from_u64(6);
        let err = acquire_with_retry(&gov, "orders", &instant(4), &mut rng).unwrap_err();
        assert!(err.is_throttle());

        // Every attempt was counted
        assert_eq!(gov.metrics().function("orders").throttled, 4);
    }

    #[test]
    fn test_succeeds_when_capacity_frees() {
        let gov = Arc::new(ConcurrencyGovernor::new(10, Arc::new(RoutingMetrics::new())));
        gov.set_reserved_limit("orders", 1).unwrap();
        let held = gov.try_acquire("orders").unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(held);
        });

        let policy = RetryPolicy {
            max_attempts: 50,
            base_delay_ms: 5,
            max_delay_ms: 10,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let permit = acquire_with_retry(&gov, "orders", &policy, &mut rng).unwrap();
        releaser.join().unwrap();
        permit.release().unwrap();
    }

    #[test]
    fn test_disabled_function_exhausts_attempts() {
        let gov = ConcurrencyGovernor::new(10, Arc::new(RoutingMetrics::new()));
        gov.set_reserved_limit("orders", 2).unwrap();
        gov.set_reserved_limit("orders", 0).unwrap();

        let mut rng = StdRng::seed_from_u64(8);
        let err = acquire_with_retry(&gov, "orders", &instant(3), &mut rng).unwrap_err();
        assert!(err.is_throttle());
        assert_eq!(gov.metrics().function("orders").throttled, 3);
    }
}
