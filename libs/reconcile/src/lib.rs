//! Rotation reconciliation primitives.
//!
//! A parent describes an instance template whose hosts contain a random
//! placeholder. This library keeps exactly one fresh instance per parent:
//! instances expire after a bounded lifetime, and a replacement is created
//! a handover window before the current one expires, so there is never a gap.
//!
//! - **Validation**: every templated host must contain the placeholder.
//! - **Spec hash**: deterministic digest of the template, embedded in
//!   instance names to detect template changes.
//! - **Lifecycle**: instances are expired, expiring soon or alive.
//! - **Plan**: delete expired instances, create at most one replacement.
//! - **Conditions**: idempotent status bookkeeping.
//!
//! # Invariants
//!
//! - An instance whose embedded hash differs from the current spec hash is
//!   expired, whatever its age.
//! - At most one instance is created per pass, and never for an invalid spec.
//! - A pass is a pure function of the store snapshot and the current time,
//!   so re-running it is always safe.

mod condition;
mod error;
mod hash;
mod lifecycle;
mod plan;
mod reconciler;
mod retry;
mod source;
mod store;
mod types;
mod validate;

use std::time::Duration;

pub use condition::{new_condition, set_condition};
pub use error::{ReconcileError, StoreError, StoreResult};
pub use hash::{safe_encode, short_digest, SpecHash};
pub use lifecycle::{
    embedded_spec_hash, ExpiryReason, Lifecycle, RotationPolicy, MAX_POLICY_DAYS,
};
pub use plan::{plan_rotation, render_instance, requeue_after, Deletion, RotationPlan};
pub use reconciler::{
    PassSummary, ReconcileOutcome, Reconciler, SPEC_INVALID_REASON, SPEC_VALID_MESSAGE,
    SPEC_VALID_REASON,
};
pub use retry::{RetryTracker, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};
pub use source::{
    Clock, DigestEncoder, ManualClock, RandomSource, ShortEncoder, SystemClock, UuidSource,
};
pub use store::{MemoryStore, Store};
pub use types::*;
pub use validate::{aggregate_message, validate_spec, FieldError, FieldPath};

/// Token replaced by a fresh random value in every templated host.
pub const RANDOM_PLACEHOLDER: &str = "|RANDOM|";

/// Default maximum lifetime of an instance.
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(8 * 60 * 60);

/// Default handover window before expiry.
pub const DEFAULT_HANDOVER: Duration = Duration::from_secs(10 * 60);

/// Default period after which every parent is reconciled again.
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(5 * 60);
