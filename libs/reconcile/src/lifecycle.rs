//! Age-based lifecycle classification of instances.

use chrono::{DateTime, Duration, Utc};

use crate::error::ReconcileError;
use crate::hash::SpecHash;
use crate::types::Instance;

/// Longest accepted lifetime or handover, in days.
pub const MAX_POLICY_DAYS: i64 = 3650;

/// Lifetime settings for rotated instances.
///
/// A replacement is created `handover` before an instance reaches
/// `max_lifetime`; the old instance is deleted once it passes `max_lifetime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    max_lifetime: Duration,
    handover: Duration,
}

impl RotationPolicy {
    /// Build a policy. Durations must lie between zero and
    /// [`MAX_POLICY_DAYS`]. A handover at least as long as the lifetime is
    /// allowed and means nothing is ever considered fully alive.
    pub fn new(max_lifetime: Duration, handover: Duration) -> Result<Self, ReconcileError> {
        check_range("max lifetime", max_lifetime)?;
        check_range("handover duration", handover)?;

        Ok(Self {
            max_lifetime,
            handover,
        })
    }

    /// Build a policy from unsigned durations.
    pub fn from_std(
        max_lifetime: std::time::Duration,
        handover: std::time::Duration,
    ) -> Result<Self, ReconcileError> {
        let convert = |d: std::time::Duration| {
            Duration::from_std(d)
                .map_err(|e| ReconcileError::InvalidPolicy(format!("{d:?} out of range: {e}")))
        };
        Self::new(convert(max_lifetime)?, convert(handover)?)
    }

    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    pub fn handover(&self) -> Duration {
        self.handover
    }

    /// Classify one instance at `now` against the current spec hash.
    pub fn classify(
        &self,
        instance: &Instance,
        now: DateTime<Utc>,
        current_hash: &SpecHash,
    ) -> Lifecycle {
        if embedded_spec_hash(&instance.name) != Some(current_hash.as_str()) {
            return Lifecycle::Expired(ExpiryReason::SpecChanged);
        }

        let age = now.signed_duration_since(instance.creation_time);
        if age > self.max_lifetime {
            Lifecycle::Expired(ExpiryReason::LifetimeExceeded)
        } else if age > self.max_lifetime - self.handover {
            Lifecycle::ExpiringSoon
        } else {
            Lifecycle::Alive
        }
    }
}

fn check_range(what: &str, value: Duration) -> Result<(), ReconcileError> {
    if value < Duration::zero() {
        return Err(ReconcileError::InvalidPolicy(format!(
            "{what} must not be negative, got {value}"
        )));
    }
    if value > Duration::days(MAX_POLICY_DAYS) {
        return Err(ReconcileError::InvalidPolicy(format!(
            "{what} must not exceed {MAX_POLICY_DAYS} days, got {value}"
        )));
    }
    Ok(())
}

/// Where an instance stands in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Must be deleted now.
    Expired(ExpiryReason),

    /// Inside the handover window: kept, but a replacement is due.
    ExpiringSoon,

    /// Fully alive; no replacement needed.
    Alive,
}

impl Lifecycle {
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// The instance was generated from a different spec.
    SpecChanged,

    /// The instance outlived the maximum lifetime.
    LifetimeExceeded,
}

impl ExpiryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpecChanged => "spec_changed",
            Self::LifetimeExceeded => "lifetime_exceeded",
        }
    }
}

/// Extract the spec hash segment from `<parent>-<hash>-<suffix>`.
///
/// The parent name may itself contain dashes, so the hash is read from the
/// end. Names with fewer than three segments carry no hash.
pub fn embedded_spec_hash(name: &str) -> Option<&str> {
    let mut parts = name.rsplit('-');
    let _suffix = parts.next()?;
    let hash = parts.next()?;
    parts.next()?;
    Some(hash)
}
