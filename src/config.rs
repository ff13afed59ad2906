//! Runtime configuration of the reconcile engine

use std::time::Duration;

use crate::retry::{RetryConfig, MAX_RETRY_INTERVAL};
use crate::Error;

/// Default workers per resource kind
pub const DEFAULT_WORKERS: usize = 4;
/// Default interval between full re-enqueues
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(15 * 60);

/// Settings shared by the claim and access controllers
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Worker tasks per resource kind
    pub workers: usize,
    /// Interval at which every cached key is re-enqueued; zero disables resync
    pub resync_period: Duration,
    /// Per-key retry backoff
    pub retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            resync_period: DEFAULT_RESYNC_PERIOD,
            retry: RetryConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::validation("config", "worker count must be at least 1"));
        }
        if self.retry.initial_delay.is_zero() {
            return Err(Error::validation("config", "retry interval start must be positive"));
        }
        if self.retry.max_delay > MAX_RETRY_INTERVAL {
            return Err(Error::validation(
                "config",
                format!(
                    "retry interval max {:?} exceeds the limit of {:?}",
                    self.retry.max_delay, MAX_RETRY_INTERVAL
                ),
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(Error::validation(
                "config",
                format!(
                    "retry interval start {:?} exceeds retry interval max {:?}",
                    self.retry.initial_delay, self.retry.max_delay
                ),
            ));
        }
        Ok(())
    }
}
