//! Failure backoff for reconciliation passes.

use std::collections::BTreeMap;
use std::time::Duration;

/// Default delay after the first failure.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default number of failures after which the delay stops growing.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Retry tracker for failed passes.
///
/// Each consecutive failure of the same key doubles the delay, up to
/// `max_retries` doublings and never beyond `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryTracker<K: Ord> {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,

    /// Consecutive failures per key.
    failures: BTreeMap<K, u32>,
}

impl<K: Ord> RetryTracker<K> {
    /// Create a new retry tracker.
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries: max_retries.max(1),
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure for a key and return how long to wait before retrying.
    pub fn record_failure(&mut self, key: K) -> Duration {
        let count = self.failures.entry(key).or_insert(0);
        *count = count.saturating_add(1);

        let doublings = (*count).min(self.max_retries) - 1;
        self.base_delay
            .saturating_mul(2u32.saturating_pow(doublings))
            .min(self.max_delay)
    }

    /// Consecutive failures recorded for a key.
    pub fn failures(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Returns true once a key has used up its doublings.
    pub fn is_exhausted(&self, key: &K) -> bool {
        self.failures(key) >= self.max_retries
    }

    /// Clear failure tracking for a key (on success).
    pub fn clear(&mut self, key: &K) {
        self.failures.remove(key);
    }
}
