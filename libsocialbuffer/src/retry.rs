//! Post-level retry back-off
//!
//! A failed post is re-published by the scheduler sweep, never inside the
//! publish call itself. Each retry waits `base_delay * 2^(attempt-1)`,
//! capped at `max_delay`, with ±25% jitter.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::DEFAULT_MAX_RETRIES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Back-off before retry number `attempt` (1-based), without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let computed = self.base_delay.saturating_mul(1u32 << exponent);
        computed.min(self.max_delay)
    }

    /// Back-off before retry number `attempt`, jittered into `[0.75, 1.25)` of the base.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        apply_jitter(self.base_delay_for(attempt), rand::random::<f64>())
    }

    /// When a post that has failed `retry_count` times may be tried again.
    ///
    /// `None` once the budget is spent.
    pub fn next_attempt_at(
        &self,
        failed_at: DateTime<Utc>,
        retry_count: u32,
    ) -> Option<DateTime<Utc>> {
        if retry_count >= self.max_retries {
            return None;
        }
        let delay = chrono::Duration::from_std(self.delay_for(retry_count.max(1)))
            .unwrap_or_else(|_| chrono::Duration::seconds(self.max_delay.as_secs() as i64));
        Some(failed_at + delay)
    }
}

/// Scale `delay` by `0.75 + sample * 0.5` where `sample` is in `[0, 1)`.
fn apply_jitter(delay: Duration, sample: f64) -> Duration {
    let factor = sample.clamp(0.0, 1.0) * 0.5 + 0.75;
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.base_delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.base_delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.base_delay_for(3), Duration::from_secs(40));
        assert_eq!(policy.base_delay_for(4), Duration::from_secs(60));
        assert_eq!(policy.base_delay_for(30), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_secs(100);
        assert_eq!(apply_jitter(base, 0.0), Duration::from_secs(75));
        assert_eq!(apply_jitter(base, 0.5), Duration::from_secs(100));
        assert!(apply_jitter(base, 0.999) < Duration::from_secs(125));
    }

    #[test]
    fn test_delay_for_stays_within_jitter_window() {
        let policy = policy();
        for _ in 0..100 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_secs(15));
            assert!(delay <= Duration::from_secs(25));
        }
    }

    #[test]
    fn test_next_attempt_none_when_exhausted() {
        let policy = policy();
        let now = Utc::now();
        assert!(policy.next_attempt_at(now, 5).is_none());

        let next = policy.next_attempt_at(now, 1).unwrap();
        assert!(next > now);
        assert!(next <= now + chrono::Duration::seconds(13));
    }
}
