//! Backoff between retries of transient inference failures.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the raw delay grows with each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Randomization applied to the raw delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Uniform in 0..=delay.
    Full,
    /// Half fixed, half uniform.
    #[default]
    Equal,
}

/// Backoff configuration for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth strategy.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl BackoffPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the growth strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Capped delay before jitter for the given zero-based retry.
    #[must_use]
    pub fn raw_delay_ms(&self, retry: u32) -> u64 {
        let base = self.base_delay_ms;
        let delay = match self.strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1),
            BackoffStrategy::Constant => base,
        };
        delay.min(self.max_delay_ms)
    }

    /// Delay to sleep before the given zero-based retry.
    ///
    /// A server-provided retry hint raises the delay but never beyond the cap.
    #[must_use]
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let delay = self.raw_delay_ms(retry);
        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };
        let hinted = hint
            .map(|h| u64::try_from(h.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
            .min(self.max_delay_ms);
        Duration::from_millis(jittered.max(hinted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_caps() {
        let policy = BackoffPolicy::new()
            .with_base_delay_ms(1_000)
            .with_max_delay_ms(5_000)
            .with_jitter(JitterStrategy::None);
        assert_eq!(policy.raw_delay_ms(0), 1_000);
        assert_eq!(policy.raw_delay_ms(1), 2_000);
        assert_eq!(policy.raw_delay_ms(2), 4_000);
        assert_eq!(policy.raw_delay_ms(3), 5_000);
        assert_eq!(policy.raw_delay_ms(60), 5_000);
    }

    #[test]
    fn test_linear_and_constant() {
        let linear = BackoffPolicy::new()
            .with_base_delay_ms(100)
            .with_strategy(BackoffStrategy::Linear);
        assert_eq!(linear.raw_delay_ms(2), 300);

        let constant = BackoffPolicy::new()
            .with_base_delay_ms(100)
            .with_strategy(BackoffStrategy::Constant);
        assert_eq!(constant.raw_delay_ms(5), 100);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let full = BackoffPolicy::new()
            .with_base_delay_ms(1_000)
            .with_jitter(JitterStrategy::Full);
        let equal = BackoffPolicy::new()
            .with_base_delay_ms(1_000)
            .with_jitter(JitterStrategy::Equal);
        for _ in 0..50 {
            assert!(full.delay_for(0, None) <= Duration::from_millis(1_000));
            let d = equal.delay_for(0, None);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn test_retry_hint_raises_delay_up_to_cap() {
        let policy = BackoffPolicy::new()
            .with_base_delay_ms(100)
            .with_max_delay_ms(10_000)
            .with_jitter(JitterStrategy::None);
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(60))),
            Duration::from_secs(10)
        );
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(100));
    }
}
