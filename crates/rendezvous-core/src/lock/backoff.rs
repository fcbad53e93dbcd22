//! Poll policy: decides how long to wait between lock polls.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter for lock polling.
///
/// delay(n) = min(base_delay * multiplier^(n - 1), max_delay), then spread by
/// `±jitter` (a fraction of the delay) so pollers on different nodes do not
/// hit the Store in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay before the second poll.
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound before jitter.
    pub max_delay: Duration,

    /// Fraction of the delay used as jitter, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: 0.2,
        }
    }
}

impl PollPolicy {
    /// A fixed interval without growth or jitter.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            base_delay: interval,
            multiplier: 1.0,
            max_delay: interval,
            jitter: 0.0,
        }
    }

    /// Deterministic part of the delay after `attempts` failed polls
    /// (1-indexed; 0 is treated as 1).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// `next_delay` spread by a random jitter.
    pub fn jittered_delay(&self, attempts: u32) -> Duration {
        let delay = self.next_delay(attempts);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_starts_at_half_a_second() {
        let policy = PollPolicy::default();
        assert_eq!(policy.next_delay(1), Duration::from_millis(500));
        assert_eq!(policy.next_delay(0), Duration::from_millis(500));
    }

    #[test]
    fn exponential_growth_is_capped() {
        let policy = PollPolicy::default();
        assert_eq!(policy.next_delay(2), Duration::from_secs(1));
        assert_eq!(policy.next_delay(3), Duration::from_secs(2));
        assert_eq!(policy.next_delay(5), Duration::from_secs(5));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = PollPolicy::default();
        for attempt in 1..20 {
            let base = policy.next_delay(attempt);
            let jittered = policy.jittered_delay(attempt);
            assert!(jittered >= base.mul_f64(0.8));
            assert!(jittered <= base.mul_f64(1.2));
        }
    }

    #[test]
    fn fixed_policy_never_changes() {
        let policy = PollPolicy::fixed(Duration::from_millis(50));
        assert_eq!(policy.jittered_delay(1), Duration::from_millis(50));
        assert_eq!(policy.jittered_delay(9), Duration::from_millis(50));
    }
}
