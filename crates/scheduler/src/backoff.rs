use std::time::Duration;

use counselhub_core::models::task::RetryPolicy;
use rand::Rng;

/// Retry delay for the n-th failed attempt of a task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    /// Fraction of the delay that is randomized, `0.0..=1.0`
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(
            Duration::from_millis(policy.base_delay_ms),
            Duration::from_millis(policy.max_delay_ms),
        )
        .with_jitter(0.2)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retrying after `attempt` attempts have run (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial.as_millis() as f64 * self.multiplier.powi(exponent);
        let delay_ms = delay_ms.min(self.max.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// [`delay_for`](Self::delay_for) shortened by a random share of up to `jitter`
    pub fn jittered<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter == 0.0 {
            return delay;
        }
        let factor = 1.0 - rng.gen_range(0.0..=self.jitter);
        delay.mul_f64(factor)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_policy(&RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;

    #[rstest]
    #[case(1, 100)]
    #[case(2, 200)]
    #[case(3, 400)]
    #[case(4, 800)]
    fn test_backoff_progression(#[case] attempt: u32, #[case] expected_ms: u64) {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(backoff.delay_for(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_backoff_max_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));

        for attempt in 1..40 {
            assert!(backoff.delay_for(attempt) <= Duration::from_secs(1));
        }
        assert_eq!(backoff.delay_for(30), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_custom_multiplier() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10)).with_multiplier(3.0);

        assert_eq!(backoff.delay_for(2), Duration::from_millis(300));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(900));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(1000), Duration::from_secs(60)).with_jitter(0.5);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..100 {
            let delay = backoff.jittered(1, &mut rng);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_policy_defaults() {
        let backoff = ExponentialBackoff::from_policy(&RetryPolicy::default());

        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(20), Duration::from_secs(600));
    }
}
