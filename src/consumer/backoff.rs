//! Exponential backoff with jitter, same shape as the teacher's
//! `BackoffCalculator` (xorshift64 jitter source, base/multiplier/max),
//! reused for both in-process retry and retry-topic republish
//! scheduling.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// In-process retry: 3 attempts, base 1s, multiplier 2, capped at 10s.
    pub const IN_PROCESS: Self = Self {
        base: Duration::from_secs(1),
        multiplier: 2.0,
        max: Duration::from_secs(10),
        max_attempts: 3,
    };

    /// Retry-topic republish schedule: 5 attempts, same base/multiplier/cap.
    pub const RETRY_TOPIC: Self = Self {
        base: Duration::from_secs(1),
        multiplier: 2.0,
        max: Duration::from_secs(10),
        max_attempts: 5,
    };

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = exp.min(self.max.as_secs_f64());
        let mut rng = rand::thread_rng();
        let jittered = capped * rng.gen_range(0.5..=1.0);
        Duration::from_secs_f64(jittered)
    }

    pub fn exhausted(&self, attempts_made: u32) -> bool {
        attempts_made >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let policy = BackoffPolicy::RETRY_TOPIC;
        for attempt in 0..8 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= policy.max);
        }
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let policy = BackoffPolicy::IN_PROCESS;
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
