//! Per-key exponential backoff for failed reconciliations.
//!
//! Each key tracks its own count of consecutive failures. The delay starts at
//! the configured floor, doubles on every failure and is capped at the
//! ceiling. [`ItemBackoff::forget`] resets a key back to the floor.
//!
//! # Example
//!
//! ```ignore
//! use bucket_operator::retry::{ItemBackoff, RetryConfig};
//!
//! let backoff = ItemBackoff::new(RetryConfig::default());
//! let first = backoff.next_delay(&"ns/claim".to_string());  // 1s
//! let second = backoff.next_delay(&"ns/claim".to_string()); // 2s
//! backoff.forget(&"ns/claim".to_string());
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Longest delay the queue will ever wait before re-adding a key
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Backoff configuration for retrying failed keys.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a doubling config with the given floor and ceiling
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Delay after `failures` consecutive failures (0 = first retry)
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = i32::try_from(failures).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}

/// Exponential backoff tracked independently per key.
#[derive(Debug)]
pub struct ItemBackoff<K> {
    config: RetryConfig,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> ItemBackoff<K> {
    /// Create a tracker with no failures recorded
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn next_delay(&self, key: &K) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.clone()).or_insert(0);
        let delay = self.config.delay_for(*count);
        *count = count.saturating_add(1);
        delay
    }

    /// Reset `key` to the floor
    pub fn forget(&self, key: &K) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Number of consecutive failures recorded for `key`
    pub fn failures(&self, key: &K) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}
