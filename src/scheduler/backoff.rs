// Exponential backoff for remote calls

use crate::models::RetrySettings;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32, jitter: f64) -> Self {
        Self {
            base,
            max,
            max_attempts: max_attempts.max(1),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.max_attempts,
            settings.jitter,
        )
    }

    /// Delay before the retry that follows `failures` consecutive failures
    /// (1-based). Never exceeds the configured maximum.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exponent).min(self.max);
        if self.jitter == 0.0 {
            return delay;
        }
        let extra = delay.mul_f64(rand::thread_rng().gen_range(0.0..=self.jitter));
        (delay + extra).min(self.max)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True once `failures` consecutive failures used up the budget.
    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}
