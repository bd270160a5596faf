//! Shared admission gate in front of the inference client.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::utils::duration_ms;

/// Limits enforced by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Calls allowed in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Calls allowed to start within one interval.
    #[serde(default = "default_calls_per_interval")]
    pub calls_per_interval: usize,
    /// Length of the sliding window.
    #[serde(default = "default_interval")]
    pub interval: Duration,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_calls_per_interval() -> usize {
    60
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            calls_per_interval: default_calls_per_interval(),
            interval: default_interval(),
        }
    }
}

/// Bounds concurrent calls and calls per sliding interval across runs.
#[derive(Debug)]
pub struct AdmissionGate {
    config: GateConfig,
    slots: Arc<Semaphore>,
    window: Mutex<VecDeque<Instant>>,
}

/// Held while a call is in flight; dropping it frees the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _slot: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// Creates a gate. Zero limits are raised to one.
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        let config = GateConfig {
            max_concurrent: config.max_concurrent.max(1),
            calls_per_interval: config.calls_per_interval.max(1),
            interval: config.interval,
        };
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            window: Mutex::new(VecDeque::new()),
            config,
        }
    }

    /// A gate that admits everything, for tests.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(GateConfig {
            max_concurrent: Semaphore::MAX_PERMITS,
            calls_per_interval: usize::MAX,
            interval: Duration::ZERO,
        })
    }

    /// The effective limits.
    #[must_use]
    pub fn config(&self) -> GateConfig {
        self.config
    }

    /// Free concurrency slots.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Waits for a concurrency slot and a free spot in the rate window.
    pub async fn admit(&self) -> AdmissionPermit {
        let slot = loop {
            if let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await {
                break permit;
            }
        };

        loop {
            let wait = self.reserve_window_slot();
            match wait {
                None => break,
                Some(delay) => {
                    debug!(delay_ms = duration_ms(delay), "rate window full, waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        AdmissionPermit { _slot: slot }
    }

    /// Records a call start if the window has room, else returns the wait.
    fn reserve_window_slot(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut window = self.window.lock();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.config.interval {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() < self.config.calls_per_interval {
            window.push_back(now);
            return None;
        }
        window
            .front()
            .map(|oldest| self.config.interval.saturating_sub(now.duration_since(*oldest)))
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrency_slots_released_on_drop() {
        let gate = AdmissionGate::new(GateConfig {
            max_concurrent: 2,
            ..GateConfig::default()
        });
        let a = gate.admit().await;
        let _b = gate.admit().await;
        assert_eq!(gate.available_slots(), 0);
        drop(a);
        assert_eq!(gate.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_third_call_waits_when_full() {
        let gate = Arc::new(AdmissionGate::new(GateConfig {
            max_concurrent: 1,
            ..GateConfig::default()
        }));
        let held = gate.admit().await;
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _permit = gate.admit().await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_window_delays_excess_calls() {
        let gate = AdmissionGate::new(GateConfig {
            max_concurrent: 10,
            calls_per_interval: 2,
            interval: Duration::from_secs(10),
        });
        let start = Instant::now();
        drop(gate.admit().await);
        drop(gate.admit().await);
        assert!(start.elapsed() < Duration::from_secs(1));

        drop(gate.admit().await);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[test]
    fn test_zero_limits_are_raised() {
        let gate = AdmissionGate::new(GateConfig {
            max_concurrent: 0,
            calls_per_interval: 0,
            interval: Duration::from_secs(1),
        });
        assert_eq!(gate.config().max_concurrent, 1);
        assert_eq!(gate.config().calls_per_interval, 1);
    }
}
