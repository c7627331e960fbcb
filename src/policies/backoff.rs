//! # Backoff policy for restarting processes.
//!
//! [`BackoffPolicy`] controls how restart delays grow after repeated fast failures.
//! It is parameterized by:
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! Two ways of using it:
//! - **Attempt-indexed** via [`BackoffPolicy::next`]: the delay for attempt `n` is
//!   `first × factor^n`, clamped to `max`, then jitter is applied. Used for the
//!   configuration process, whose restart counter is the only state.
//! - **Stateful** via [`Backoff`]: a generator holding the `current` interval that is
//!   grown on every fast failure and reset after a healthy run. Used per job.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{Backoff, BackoffPolicy, JitterPolicy};
//!
//! let policy = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(policy.next(0), Duration::from_secs(1));
//! assert_eq!(policy.next(3), Duration::from_secs(8));
//! assert_eq!(policy.next(10), Duration::from_secs(10));
//!
//! let mut backoff = Backoff::new(policy);
//! assert_eq!(backoff.advance(), Duration::from_secs(1));
//! assert_eq!(backoff.current(), Duration::from_secs(2));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Restart backoff policy.
///
/// Encapsulates parameters that determine how restart delays grow:
/// - [`BackoffPolicy::factor`]: multiplicative growth factor;
/// - [`BackoffPolicy::first`]: the initial delay;
/// - [`BackoffPolicy::max`]: the maximum delay cap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Initial delay before the first restart.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter policy to spread restarts of many processes.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns the per-job policy:
    /// - `first = 1s`;
    /// - `factor = 2.0` (doubling);
    /// - `max = 6h`;
    /// - no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(6 * 60 * 60),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given attempt number (0-indexed).
    ///
    /// The base delay is `first × factor^attempt`, clamped to [`BackoffPolicy::max`].
    /// Jitter is applied to the clamped base, but the result is **never** fed back
    /// into subsequent calculations.
    pub fn next(&self, attempt: u32) -> Duration {
        let clamped_exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(clamped_exp);
        let base = self.clamp_secs(unclamped_secs);

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }

    /// Returns the interval following `current`: `current × factor`, clamped to `max`.
    ///
    /// No jitter is applied; the result is meant to be stored and grown again.
    pub fn grow(&self, current: Duration) -> Duration {
        self.clamp_secs(current.as_secs_f64() * self.factor)
    }

    /// The starting interval, clamped to `max`.
    pub fn initial(&self) -> Duration {
        self.first.min(self.max)
    }

    fn clamp_secs(&self, secs: f64) -> Duration {
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Stateful exponential delay generator.
///
/// Holds the `current` interval. [`Backoff::advance`] hands out the current
/// interval and grows it for next time; [`Backoff::reset`] goes back to the minimum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    /// Creates a generator positioned at the policy's initial interval.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial(),
            policy,
        }
    }

    /// Interval that the next [`advance`](Self::advance) will hand out.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the current interval (with jitter applied) and grows the stored one.
    pub fn advance(&mut self) -> Duration {
        let delay = self.policy.jitter.apply(self.current);
        self.current = self.policy.grow(self.current);
        delay
    }

    /// Goes back to the initial interval.
    pub fn reset(&mut self) {
        self.current = self.policy.initial();
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn doubling(first: u64, max: u64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_secs(first),
            max: Duration::from_secs(max),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_attempt_zero_returns_first() {
        assert_eq!(doubling(1, 300).next(0), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let policy = doubling(1, 300);
        assert_eq!(policy.next(1), Duration::from_secs(2));
        assert_eq!(policy.next(2), Duration::from_secs(4));
        assert_eq!(policy.next(3), Duration::from_secs(8));
        assert_eq!(policy.next(4), Duration::from_secs(16));
    }

    #[test]
    fn test_clamped_to_max() {
        assert_eq!(doubling(1, 300).next(9), Duration::from_secs(300));
    }

    #[test]
    fn test_first_exceeds_max() {
        let policy = doubling(10, 5);
        assert_eq!(policy.next(0), Duration::from_secs(5));
        assert_eq!(policy.initial(), Duration::from_secs(5));
    }

    #[test]
    fn test_non_finite_overflow_clamps_to_max() {
        assert_eq!(doubling(1, 10).next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_grow_doubles_until_cap() {
        let policy = doubling(1, 6);
        let mut d = policy.initial();
        let mut seen = Vec::new();
        for _ in 0..5 {
            d = policy.grow(d);
            seen.push(d.as_secs());
        }
        assert_eq!(seen, vec![2, 4, 6, 6, 6]);
    }

    #[test]
    fn test_default_policy_caps_at_six_hours() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial(), Duration::from_secs(1));
        assert_eq!(policy.next(40), Duration::from_secs(21_600));
    }

    #[test]
    fn test_generator_advance_and_reset() {
        let mut backoff = Backoff::new(doubling(1, 8));
        assert_eq!(backoff.advance(), Duration::from_secs(1));
        assert_eq!(backoff.advance(), Duration::from_secs(2));
        assert_eq!(backoff.advance(), Duration::from_secs(4));
        assert_eq!(backoff.advance(), Duration::from_secs(8));
        assert_eq!(backoff.advance(), Duration::from_secs(8));
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(1000),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: JitterPolicy::Equal,
        };
        for attempt in 0..50 {
            let delay = policy.next(attempt);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_decorrelated_jitter_stays_within_cap() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(1),
            max: Duration::from_secs(300),
            factor: 2.0,
            jitter: JitterPolicy::Decorrelated,
        };
        for _ in 0..100 {
            let delay = policy.next(6);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs(300));
        }
    }
}
