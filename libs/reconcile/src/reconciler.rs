//! Reconciliation pass driver.
//!
//! Fetches a parent and its instances, applies the rotation plan to the
//! store, records the outcome in the parent's status and reports when the
//! next pass is due.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::condition::{new_condition, set_condition};
use crate::error::ReconcileError;
use crate::lifecycle::RotationPolicy;
use crate::plan::{plan_rotation, requeue_after};
use crate::source::{Clock, DigestEncoder, RandomSource, ShortEncoder, SystemClock, UuidSource};
use crate::store::Store;
use crate::types::{ConditionStatus, ConditionType, ParentKey};
use crate::validate::aggregate_message;

pub const SPEC_VALID_REASON: &str = "SpecValid";
pub const SPEC_INVALID_REASON: &str = "SpecInvalid";
pub const SPEC_VALID_MESSAGE: &str = "spec is valid";

/// What a pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The parent no longer exists. Nothing was done and nothing is due.
    ParentGone,

    /// The pass ran to completion.
    Reconciled(PassSummary),
}

impl ReconcileOutcome {
    /// Delay until the next pass, if one is due. May be negative.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::ParentGone => None,
            Self::Reconciled(summary) => summary.requeue_after,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Whether the parent spec passed validation.
    pub valid: bool,

    /// Name of the instance created in this pass.
    pub created: Option<String>,

    /// Instances confirmed gone (deleted now or already missing).
    pub deleted: Vec<String>,

    /// Instances whose deletion failed and will be retried next pass.
    pub delete_failures: Vec<String>,

    /// Delay until the handover window of the instance due for renewal.
    /// Negative means overdue; `None` means nothing to renew.
    pub requeue_after: Option<Duration>,
}

/// Reconciler for rotated instances.
pub struct Reconciler {
    store: Arc<dyn Store>,
    policy: RotationPolicy,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    encoder: Arc<dyn ShortEncoder>,
}

impl Reconciler {
    /// Create a reconciler using the wall clock and random UUIDs.
    pub fn new(store: Arc<dyn Store>, policy: RotationPolicy) -> Self {
        Self {
            store,
            policy,
            clock: Arc::new(SystemClock),
            random: Arc::new(UuidSource),
            encoder: Arc::new(DigestEncoder),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn ShortEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Run a single reconciliation pass for one parent.
    ///
    /// Store failures abort the pass and are returned for retry, except
    /// not-found on the parent (reported as [`ReconcileOutcome::ParentGone`])
    /// and failed deletions (logged, retried on the next pass).
    #[instrument(skip(self), fields(parent = %key))]
    pub async fn reconcile(&self, key: &ParentKey) -> Result<ReconcileOutcome, ReconcileError> {
        let parent = match self.store.get_parent(key).await {
            Ok(parent) => parent,
            Err(e) if e.is_not_found() => {
                // Owned instances are garbage collected through their owner reference.
                debug!("Parent not found, nothing to do");
                return Ok(ReconcileOutcome::ParentGone);
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch parent");
                return Err(e.into());
            }
        };

        debug!("Start processing");

        let instances = self.store.list_instances(&parent).await.map_err(|e| {
            error!(error = %e, "Failed to list owned instances");
            e
        })?;

        let now = self.clock.now();
        let plan = plan_rotation(
            &parent,
            &instances,
            now,
            &self.policy,
            self.random.as_ref(),
            self.encoder.as_ref(),
        )
        .map_err(|e| {
            error!(error = %e, "Failed to plan rotation");
            e
        })?;

        debug!(
            spec_hash = %plan.spec_hash,
            owned = instances.len(),
            expired = plan.deletions.len(),
            "Classified instances"
        );

        let mut summary = PassSummary {
            valid: plan.is_valid(),
            ..PassSummary::default()
        };

        for deletion in &plan.deletions {
            let name = &deletion.instance.name;
            match self.store.delete_instance(&deletion.instance).await {
                Ok(()) => {
                    info!(instance = %name, reason = deletion.reason.as_str(), "Deleted expired instance");
                    summary.deleted.push(name.clone());
                }
                Err(e) if e.is_not_found() => {
                    debug!(instance = %name, "Expired instance already gone");
                    summary.deleted.push(name.clone());
                }
                Err(e) => {
                    error!(instance = %name, error = %e, "Failed to delete expired instance");
                    summary.delete_failures.push(name.clone());
                }
            }
        }

        if let Some(instance) = &plan.creation {
            self.store.create_instance(instance).await.map_err(|e| {
                error!(instance = %instance.name, error = %e, "Failed to create instance");
                e
            })?;
            info!(instance = %instance.name, "Created instance");
            summary.created = Some(instance.name.clone());
        }

        let condition = if plan.is_valid() {
            new_condition(
                ConditionType::Valid,
                ConditionStatus::True,
                SPEC_VALID_REASON,
                SPEC_VALID_MESSAGE,
                now,
            )
        } else {
            let message = aggregate_message(&plan.validation_errors);
            warn!(validation_errors = %message, "Spec invalid");
            new_condition(
                ConditionType::Valid,
                ConditionStatus::False,
                SPEC_INVALID_REASON,
                message,
                now,
            )
        };

        let mut status = set_condition(parent.status.clone(), condition);
        status.next_renewal_time = plan.next_renewal_time;

        match self.store.update_status(key, &status).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Parent deleted before status update");
                return Ok(ReconcileOutcome::ParentGone);
            }
            Err(e) => {
                error!(error = %e, "Failed to update status");
                return Err(e.into());
            }
        }

        summary.requeue_after = requeue_after(plan.next_renewal_time, now, &self.policy);

        info!(
            requeue_after_secs = summary.requeue_after.map(|d| d.num_seconds()),
            created = summary.created.is_some(),
            deleted = summary.deleted.len(),
            "Processed successfully"
        );

        Ok(ReconcileOutcome::Reconciled(summary))
    }
}
