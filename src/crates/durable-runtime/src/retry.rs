//! Retry policies — exponential backoff with jitter for transient step failures.
//!
//! A `RetryPolicy` is a pure function of `(error, attempt)`: it never touches the clock, the
//! checkpoint log, or any other component. The coordination core is responsible for turning
//! a `RetryDecision::Retry` into a checkpointed RETRY transition and, later, a READY one.
//!
//! # Quick start
//!
//! ```rust
//! use durable_runtime::retry::{JitterMode, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::exponential_backoff(5, Duration::from_secs(1), Duration::from_secs(10), 2.0, JitterMode::None);
//! let delay = policy.delay_for_attempt(0);
//! assert_eq!(delay, Duration::from_secs(1));
//! ```

use durable_checkpoint::ErrorRecord;
use rand::Rng;
use std::time::Duration;

/// How much randomness to apply to a computed backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterMode {
    /// Use the computed delay as-is.
    None,
    /// Uniformly sample in `[0, raw]`, floored at 1 second.
    Full,
    /// Uniformly sample in `[raw/2, raw]`, floored at 1 second.
    Half,
}

/// The outcome of consulting a policy after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Stop,
}

#[derive(Debug, Clone)]
enum Kind {
    NoRetry,
    FixedDelay {
        max_attempts: usize,
        delay: Duration,
    },
    ExponentialBackoff {
        max_attempts: usize,
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: JitterMode,
    },
}

/// Decides whether a failed Step attempt should be retried, and after how long.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    kind: Kind,
}

impl RetryPolicy {
    /// Never retry; the first failure is final.
    pub fn no_retry() -> Self {
        Self { kind: Kind::NoRetry }
    }

    /// Retry up to `max_attempts` times with a constant delay (`delay >= 1s`).
    pub fn fixed_delay(max_attempts: usize, delay: Duration) -> Self {
        Self {
            kind: Kind::FixedDelay {
                max_attempts,
                delay: delay.max(Duration::from_secs(1)),
            },
        }
    }

    /// Retry up to `max_attempts` times with delay `min(max, initial * multiplier^attempt)`,
    /// randomized per `jitter`. `initial` and `max` are floored at 1 second.
    pub fn exponential_backoff(
        max_attempts: usize,
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: JitterMode,
    ) -> Self {
        Self {
            kind: Kind::ExponentialBackoff {
                max_attempts,
                initial: initial.max(Duration::from_secs(1)),
                max: max.max(Duration::from_secs(1)),
                multiplier,
                jitter,
            },
        }
    }

    fn max_attempts(&self) -> usize {
        match &self.kind {
            Kind::NoRetry => 1,
            Kind::FixedDelay { max_attempts, .. } => *max_attempts,
            Kind::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }

    /// The raw (pre-jitter) delay the policy would use for `attempt`, ignoring whether
    /// `attempt` is within `max_attempts`. Exposed for tests and for the polling loop's
    /// schedule computation.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match &self.kind {
            Kind::NoRetry => Duration::ZERO,
            Kind::FixedDelay { delay, .. } => *delay,
            Kind::ExponentialBackoff {
                initial,
                max,
                multiplier,
                jitter,
                ..
            } => {
                let raw = (initial.as_secs_f64() * multiplier.powi(attempt as i32)).min(max.as_secs_f64());
                apply_jitter(raw, *jitter)
            }
        }
    }

    /// Pure decision function: does attempt number `attempt` (0-indexed, the attempt that
    /// just failed) get another try, and after how long.
    pub fn decide(&self, _error: &ErrorRecord, attempt: usize) -> RetryDecision {
        if matches!(self.kind, Kind::NoRetry) || attempt + 1 >= self.max_attempts() {
            return RetryDecision::Stop;
        }
        RetryDecision::Retry {
            delay: self.delay_for_attempt(attempt),
        }
    }
}

fn apply_jitter(raw_seconds: f64, mode: JitterMode) -> Duration {
    let floor = 1.0;
    let seconds = match mode {
        JitterMode::None => raw_seconds,
        JitterMode::Full => rand::thread_rng().gen_range(0.0..=raw_seconds).max(floor),
        JitterMode::Half => rand::thread_rng()
            .gen_range((raw_seconds / 2.0)..=raw_seconds)
            .max(floor),
    };
    Duration::from_secs_f64(seconds)
}

impl Default for RetryPolicy {
    /// Three attempts, 1s initial, 2x multiplier, 10s cap, no jitter — matches the crate's
    /// configured `retryDefault` fallback for Steps issued with no explicit policy.
    fn default() -> Self {
        Self::exponential_backoff(3, Duration::from_secs(1), Duration::from_secs(10), 2.0, JitterMode::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error() -> ErrorRecord {
        ErrorRecord::new("Boom", "transient failure")
    }

    #[test]
    fn no_retry_always_stops() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.decide(&error(), 0), RetryDecision::Stop);
    }

    #[test]
    fn fixed_delay_retries_until_max_attempts() {
        let policy = RetryPolicy::fixed_delay(3, Duration::from_secs(2));
        assert_eq!(
            policy.decide(&error(), 0),
            RetryDecision::Retry { delay: Duration::from_secs(2) }
        );
        assert_eq!(
            policy.decide(&error(), 1),
            RetryDecision::Retry { delay: Duration::from_secs(2) }
        );
        assert_eq!(policy.decide(&error(), 2), RetryDecision::Stop);
    }

    #[test]
    fn exponential_backoff_without_jitter_doubles_each_attempt() {
        let policy = RetryPolicy::exponential_backoff(
            5,
            Duration::from_secs(1),
            Duration::from_secs(100),
            2.0,
            JitterMode::None,
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn exponential_backoff_caps_at_max() {
        let policy = RetryPolicy::exponential_backoff(
            10,
            Duration::from_secs(10),
            Duration::from_secs(50),
            2.0,
            JitterMode::None,
        );
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(50));
    }

    #[test]
    fn full_jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential_backoff(
            5,
            Duration::from_secs(4),
            Duration::from_secs(100),
            1.0,
            JitterMode::Full,
        );
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(0).as_secs_f64();
            assert!((0.0..=4.0).contains(&delay) || delay == 1.0);
        }
    }

    #[test]
    fn half_jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential_backoff(
            5,
            Duration::from_secs(4),
            Duration::from_secs(100),
            1.0,
            JitterMode::Half,
        );
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(0).as_secs_f64();
            assert!(delay >= 2.0 && delay <= 4.0);
        }
    }

    #[test]
    fn decide_depends_only_on_attempt_and_error_shape() {
        let policy = RetryPolicy::fixed_delay(2, Duration::from_secs(1));
        let a = policy.decide(&error(), 0);
        let b = policy.decide(&ErrorRecord::new("Boom", "transient failure"), 0);
        assert_eq!(a, b);
    }
}
