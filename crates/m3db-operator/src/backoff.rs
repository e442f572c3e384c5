//! Per-key exponential backoff for error requeues.
//!
//! Failed reconciles requeue with exponentially growing delays; a successful
//! reconcile forgets the key so the next failure starts from the initial
//! delay again. Keys are independent - one flapping cluster never slows
//! another down.

use std::time::Duration;

use dashmap::DashMap;

/// Tracks consecutive failures per key and computes the next requeue delay
pub struct BackoffTracker {
    attempts: DashMap<String, u32>,
    initial_delay: Duration,
    max_delay: Duration,
}

impl BackoffTracker {
    /// Create a tracker with the given initial and maximum delays
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            initial_delay,
            max_delay,
        }
    }

    /// Record a failure for `key` and return the delay before the next try.
    ///
    /// Doubles per consecutive failure, capped at the maximum delay.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut entry = self.attempts.entry(key.to_string()).or_insert(0);
        let exponent = *entry;
        *entry = entry.saturating_add(1);

        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }

    /// Forget a key after a successful reconcile
    pub fn forget(&self, key: &str) {
        self.attempts.remove(key);
    }
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(300))
    }
}
