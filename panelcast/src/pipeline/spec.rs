//! Per-stage execution limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::retry::BackoffPolicy;
use crate::core::StageName;

/// Default hard limit on a single inference call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Default cumulative limit on one stage, retries and backoff included.
pub const DEFAULT_STAGE_DEADLINE: Duration = Duration::from_secs(600);

/// Default number of retries after the first transient failure.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Timeout and retry limits for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// The stage these limits apply to.
    pub name: StageName,
    /// Hard limit on each inference call.
    pub call_timeout: Duration,
    /// Cumulative limit on the stage.
    pub stage_deadline: Duration,
    /// Retries allowed after a transient failure.
    pub max_retries: u32,
    /// Delay policy between retries.
    pub backoff: BackoffPolicy,
}

impl StageSpec {
    /// Creates a spec with default limits.
    #[must_use]
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            stage_deadline: DEFAULT_STAGE_DEADLINE,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the cumulative stage deadline.
    #[must_use]
    pub fn with_stage_deadline(mut self, deadline: Duration) -> Self {
        self.stage_deadline = deadline;
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Timeout for the next call given how much of the deadline remains.
    #[must_use]
    pub fn call_budget(&self, remaining: Duration) -> Duration {
        self.call_timeout.min(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let spec = StageSpec::new(StageName::Review);
        assert_eq!(spec.call_timeout, Duration::from_secs(120));
        assert_eq!(spec.stage_deadline, Duration::from_secs(600));
        assert_eq!(spec.max_retries, 2);
    }

    #[test]
    fn test_call_budget_respects_remaining_deadline() {
        let spec = StageSpec::new(StageName::Extract).with_call_timeout(Duration::from_secs(30));
        assert_eq!(spec.call_budget(Duration::from_secs(100)), Duration::from_secs(30));
        assert_eq!(spec.call_budget(Duration::from_secs(5)), Duration::from_secs(5));
    }
}
