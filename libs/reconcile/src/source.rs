//! Injectable time and randomness.
//!
//! The reconciler never reads the wall clock or generates identifiers
//! directly, so tests can pin both.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::hash::short_digest;

/// Time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Millisecond resolution.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Source of the random value substituted into templates.
pub trait RandomSource: Send + Sync {
    fn new_identifier(&self) -> String;
}

/// Random UUID v4 identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSource;

impl RandomSource for UuidSource {
    fn new_identifier(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Turns a random identifier into the short name suffix of an instance.
///
/// The suffix must not reveal the identifier itself.
pub trait ShortEncoder: Send + Sync {
    fn encode(&self, raw: &str) -> String;
}

/// Truncated SHA-256 digest, safe-encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestEncoder;

impl ShortEncoder for DigestEncoder {
    fn encode(&self, raw: &str) -> String {
        short_digest(raw.as_bytes())
    }
}
