//! Retry policy: decides how long a failed message waits before redelivery.
//!
//! The queue itself never reschedules anything. A consumer that fails a message
//! picks the next `ScheduledEnqueueTime` (usually through
//! `Message::schedule_retry`) and Fail persists it.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first delivery.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Random spread in `[0.0, 1.0]`; `0.25` scales each delay by a factor in `[0.75, 1.25]`.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay: Duration::from_secs(15 * 60),
            jitter: 0.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next delivery of a message leased `delivery_count` times.
    ///
    /// delay = base_delay * multiplier^(delivery_count - 1), capped at `max_delay`.
    ///
    /// With base_delay=2s, multiplier=2.0:
    /// - after delivery 1: 2s
    /// - after delivery 2: 4s
    /// - after delivery 3: 8s
    pub fn next_delay(&self, delivery_count: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(delivery_count.saturating_sub(1)).unwrap_or(i32::MAX);
        let mut delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
            delay_secs *= factor;
        }

        if !delay_secs.is_finite() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(delay_secs.clamp(0.0, self.max_delay.as_secs_f64()))
            .unwrap_or(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.jitter, 0.0);
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::default();

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert_eq!(d1, Duration::from_secs(2));
        assert_eq!(d2, Duration::from_secs(4));
        assert_eq!(d3, Duration::from_secs(8));
    }

    #[test]
    fn never_delivered_uses_base_delay() {
        assert_eq!(RetryPolicy::default().next_delay(0), Duration::from_secs(2));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(10));

        assert_eq!(policy.next_delay(4), Duration::from_secs(10));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn unbounded_cap_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(Duration::from_secs(u64::MAX / 4), 3.0)
            .with_max_delay(Duration::MAX);

        assert_eq!(policy.next_delay(3), Duration::MAX);
        assert_eq!(policy.next_delay(u32::MAX), Duration::MAX);
    }

    #[test]
    fn jitter_stays_within_spread() {
        let policy = RetryPolicy::new(Duration::from_secs(10), 1.0).with_jitter(0.5);

        for _ in 0..100 {
            let delay = policy.next_delay(1);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(15));
        }
    }
}
