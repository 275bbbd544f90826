//! Retry policy: exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use vgen_models::{JobFailure, JobOptions};

/// Decides whether a failed attempt is rescheduled and with what delay.
///
/// A pure value type: all attempt counting lives on the job record, so the
/// decision is inspectable without closures capturing mutable state.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay for the first retry (doubles each retry).
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub cap_delay: Duration,
    /// Upper bound on the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            cap_delay: Duration::from_secs(300),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule after `delay`.
    Retry { delay: Duration },
    /// Terminal failure.
    GiveUp,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, cap_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            base_delay,
            cap_delay,
            max_jitter,
        }
    }

    /// Deterministic backoff for the nth retry (n >= 1), before jitter.
    ///
    /// `base * 2^(n-1)`, saturating, capped at `cap_delay`.
    pub fn backoff_for_retry(&self, nth_retry: u32, base_override: Option<Duration>) -> Duration {
        let base = base_override.unwrap_or(self.base_delay);
        let exponent = nth_retry.saturating_sub(1).min(31);
        base.saturating_mul(1u32 << exponent).min(self.cap_delay)
    }

    /// Decide the fate of a job whose attempt just failed.
    ///
    /// `attempts` is the number of attempts completed so far (including the
    /// one that just failed). Called exactly once per reported failure.
    pub fn decide(&self, failure: &JobFailure, attempts: u32, options: &JobOptions) -> RetryDecision {
        if !failure.is_retryable() {
            return RetryDecision::GiveUp;
        }
        if attempts >= options.max_attempts {
            return RetryDecision::GiveUp;
        }

        let backoff = self.backoff_for_retry(attempts, options.backoff_base());
        // A provider retry-after hint overrides a shorter computed backoff,
        // but never the cap.
        let hinted = match failure.retry_after() {
            Some(hint) => backoff.max(hint),
            None => backoff,
        };

        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };

        RetryDecision::Retry {
            delay: hinted.saturating_add(jitter).min(self.cap_delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::FailureKind;

    fn policy() -> RetryPolicy {
        // Zero jitter keeps assertions exact.
        RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(300), Duration::ZERO)
    }

    fn options(max_attempts: u32) -> JobOptions {
        JobOptions {
            max_attempts,
            ..JobOptions::default()
        }
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = policy();
        assert_eq!(policy.backoff_for_retry(1, None), Duration::from_secs(2));
        assert_eq!(policy.backoff_for_retry(2, None), Duration::from_secs(4));
        assert_eq!(policy.backoff_for_retry(3, None), Duration::from_secs(8));
        assert_eq!(policy.backoff_for_retry(4, None), Duration::from_secs(16));
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let policy = policy();
        let mut last = Duration::ZERO;
        for n in 1..=20 {
            let delay = policy.backoff_for_retry(n, None);
            assert!(delay >= last);
            assert!(delay <= Duration::from_secs(300));
            last = delay;
        }
        assert_eq!(policy.backoff_for_retry(20, None), Duration::from_secs(300));
    }

    #[test]
    fn per_job_base_override_is_used() {
        let policy = policy();
        assert_eq!(
            policy.backoff_for_retry(2, Some(Duration::from_millis(500))),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn non_retryable_gives_up_immediately() {
        let policy = policy();
        let failure = JobFailure::new(FailureKind::Auth, "bad key");
        assert_eq!(policy.decide(&failure, 1, &options(10)), RetryDecision::GiveUp);
    }

    #[test]
    fn exhausted_attempts_give_up_even_when_retryable() {
        let policy = policy();
        let failure = JobFailure::new(FailureKind::RateLimited, "throttled");
        assert!(matches!(
            policy.decide(&failure, 2, &options(3)),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(policy.decide(&failure, 3, &options(3)), RetryDecision::GiveUp);
    }

    #[test]
    fn retry_after_hint_overrides_shorter_backoff() {
        let policy = policy();
        let failure = JobFailure::new(FailureKind::RateLimited, "throttled")
            .with_retry_after(Duration::from_secs(30));
        match policy.decide(&failure, 1, &options(5)) {
            RetryDecision::Retry { delay } => assert_eq!(delay, Duration::from_secs(30)),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(
            Duration::from_secs(2),
            Duration::from_secs(300),
            Duration::from_millis(1000),
        );
        let failure = JobFailure::new(FailureKind::Network, "reset");
        for _ in 0..50 {
            match policy.decide(&failure, 1, &options(5)) {
                RetryDecision::Retry { delay } => {
                    assert!(delay >= Duration::from_secs(2));
                    assert!(delay <= Duration::from_secs(3));
                }
                other => panic!("unexpected decision: {other:?}"),
            }
        }
    }
}
