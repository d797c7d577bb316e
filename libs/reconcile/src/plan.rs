//! Pure rotation planning.
//!
//! Given a parent, the instances it currently owns and the time, decide what
//! to delete, whether to create a replacement and when the next renewal is
//! due. Nothing here touches the store.

use chrono::{DateTime, Duration, Utc};

use crate::error::ReconcileError;
use crate::hash::SpecHash;
use crate::lifecycle::{ExpiryReason, Lifecycle, RotationPolicy};
use crate::source::{RandomSource, ShortEncoder};
use crate::types::{Instance, Parent};
use crate::validate::{validate_spec, FieldError};
use crate::RANDOM_PLACEHOLDER;

/// An instance scheduled for deletion, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub instance: Instance,
    pub reason: ExpiryReason,
}

/// Outcome of planning one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPlan {
    /// Hash of the parent spec, computed whether or not it is valid.
    pub spec_hash: SpecHash,

    /// Validation problems, in rule order. Non-empty suppresses creation.
    pub validation_errors: Vec<FieldError>,

    /// Instances to delete now.
    pub deletions: Vec<Deletion>,

    /// Replacement instance to create, if any. At most one per pass.
    pub creation: Option<Instance>,

    /// When the newest alive instance (or the one being created) expires.
    pub next_renewal_time: Option<DateTime<Utc>>,
}

impl RotationPlan {
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }
}

/// Plan a reconciliation pass.
///
/// Expired instances are deleted. Instances inside the handover window are
/// kept but do not count as alive, so a replacement is created before they
/// go. A replacement is only created when nothing is fully alive and the
/// spec is valid.
pub fn plan_rotation(
    parent: &Parent,
    instances: &[Instance],
    now: DateTime<Utc>,
    policy: &RotationPolicy,
    random: &dyn RandomSource,
    encoder: &dyn ShortEncoder,
) -> Result<RotationPlan, ReconcileError> {
    let validation_errors = validate_spec(&parent.spec);
    let spec_hash = SpecHash::of(&parent.spec)?;

    let mut deletions = Vec::new();
    let mut alive: Vec<&Instance> = Vec::new();

    for instance in instances {
        match policy.classify(instance, now, &spec_hash) {
            Lifecycle::Expired(reason) => deletions.push(Deletion {
                instance: instance.clone(),
                reason,
            }),
            // Kept until it expires, but no longer blocks a replacement.
            Lifecycle::ExpiringSoon => {}
            Lifecycle::Alive => alive.push(instance),
        }
    }

    let creation = if alive.is_empty() && validation_errors.is_empty() {
        let random_id = random.new_identifier();
        let suffix = encoder.encode(&random_id);
        Some(render_instance(parent, &spec_hash, &random_id, &suffix, now))
    } else {
        None
    };

    let renewal_base = match &creation {
        Some(created) => Some(created.creation_time),
        None => newest(&alive).map(|i| i.creation_time),
    };
    let next_renewal_time = renewal_base
        .map(|created| {
            created
                .checked_add_signed(policy.max_lifetime())
                .ok_or_else(|| {
                    ReconcileError::InvalidPolicy(format!(
                        "renewal time of an instance created at {created} is out of range"
                    ))
                })
        })
        .transpose()?;

    Ok(RotationPlan {
        spec_hash,
        validation_errors,
        deletions,
        creation,
        next_renewal_time,
    })
}

/// Delay until the next pass should run: the start of the handover window
/// of the instance due for renewal. Negative means overdue.
pub fn requeue_after(
    next_renewal_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    policy: &RotationPolicy,
) -> Option<Duration> {
    next_renewal_time.map(|at| at.signed_duration_since(now) - policy.handover())
}

/// Most recently created instance, ties broken by the greatest name.
fn newest<'a>(instances: &[&'a Instance]) -> Option<&'a Instance> {
    instances
        .iter()
        .copied()
        .max_by(|a, b| {
            a.creation_time
                .cmp(&b.creation_time)
                .then_with(|| a.name.cmp(&b.name))
        })
}

/// Stamp a concrete instance out of the parent's template.
pub fn render_instance(
    parent: &Parent,
    spec_hash: &SpecHash,
    random_id: &str,
    suffix: &str,
    now: DateTime<Utc>,
) -> Instance {
    let template = &parent.spec.template;

    let mut spec = template.spec.clone();
    for rule in &mut spec.rules {
        rule.host = rule.host.replace(RANDOM_PLACEHOLDER, random_id);
    }

    Instance {
        name: format!("{}-{}-{}", parent.key.name, spec_hash, suffix),
        namespace: parent.key.namespace.clone(),
        creation_time: now,
        labels: template.metadata.labels.clone(),
        annotations: template.metadata.annotations.clone(),
        owner: parent.owner_reference(),
        spec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DigestEncoder;
    use crate::types::{ParentKey, ParentSpec, Rule};
    use chrono::TimeZone;
    use uuid::Uuid;

    struct FixedSource(&'static str);

    impl RandomSource for FixedSource {
        fn new_identifier(&self) -> String {
            self.0.to_string()
        }
    }

    const RANDOM_ID: &str = "6900d1a3-798c-4d9a-9a2f-737c72046efa";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 9, 6, 17, 12, 0).unwrap()
    }

    fn policy() -> RotationPolicy {
        RotationPolicy::new(Duration::minutes(2), Duration::seconds(10)).unwrap()
    }

    fn parent(hosts: &[&str]) -> Parent {
        let mut spec = ParentSpec::default();
        spec.template.spec.rules = hosts.iter().map(|h| Rule::host(*h)).collect();
        spec.template
            .metadata
            .labels
            .insert("labelOne".into(), "label1".into());
        spec.template
            .metadata
            .annotations
            .insert("annotationOne".into(), "anno1".into());

        Parent {
            key: ParentKey::new("default", "random-ingress"),
            uid: Uuid::from_u128(0x879a95f7_8905_4412_8b95_0bbfd0c7351f),
            spec,
            status: Default::default(),
        }
    }

    fn valid_parent() -> Parent {
        parent(&["|RANDOM|.example.com", "www.|RANDOM|.example.com"])
    }

    fn existing(parent: &Parent, suffix: &str, age: Duration) -> Instance {
        let hash = SpecHash::of(&parent.spec).unwrap();
        render_instance(parent, &hash, "2bc112e6", suffix, now() - age)
    }

    fn plan(parent: &Parent, instances: &[Instance]) -> RotationPlan {
        plan_rotation(
            parent,
            instances,
            now(),
            &policy(),
            &FixedSource(RANDOM_ID),
            &DigestEncoder,
        )
        .unwrap()
    }

    #[test]
    fn test_no_instances_creates_one() {
        let parent = valid_parent();
        let plan = plan(&parent, &[]);

        assert!(plan.deletions.is_empty());
        let created = plan.creation.expect("expected a creation");

        let hash = SpecHash::of(&parent.spec).unwrap();
        assert_eq!(
            created.name,
            format!("random-ingress-{}-{}", hash, DigestEncoder.encode(RANDOM_ID))
        );
        assert_eq!(created.spec.rules[0].host, format!("{RANDOM_ID}.example.com"));
        assert_eq!(created.spec.rules[1].host, format!("www.{RANDOM_ID}.example.com"));
        assert_eq!(created.labels, parent.spec.template.metadata.labels);
        assert_eq!(created.annotations, parent.spec.template.metadata.annotations);
        assert_eq!(created.namespace, "default");
        assert!(created.is_owned_by(&parent));

        assert_eq!(plan.next_renewal_time, Some(now() + Duration::minutes(2)));
        assert_eq!(
            requeue_after(plan.next_renewal_time, now(), &policy()),
            Some(Duration::seconds(110))
        );
    }

    #[test]
    fn test_mid_life_instance_left_alone() {
        let parent = valid_parent();
        let current = existing(&parent, "abc", Duration::minutes(1));
        let plan = plan(&parent, std::slice::from_ref(&current));

        assert!(plan.deletions.is_empty());
        assert!(plan.creation.is_none());
        assert_eq!(
            plan.next_renewal_time,
            Some(current.creation_time + Duration::minutes(2))
        );
        assert_eq!(
            requeue_after(plan.next_renewal_time, now(), &policy()),
            Some(Duration::seconds(50))
        );
    }

    #[test]
    fn test_expiring_soon_triggers_creation_without_deletion() {
        let parent = valid_parent();
        let old = existing(&parent, "abc", Duration::seconds(115));
        let plan = plan(&parent, &[old]);

        assert!(plan.deletions.is_empty());
        assert!(plan.creation.is_some());
        assert_eq!(plan.next_renewal_time, Some(now() + Duration::minutes(2)));
    }

    #[test]
    fn test_spec_change_deletes_and_recreates() {
        let old_parent = valid_parent();
        let stale = existing(&old_parent, "abc", Duration::minutes(1));

        let mut malformed = stale.clone();
        malformed.name = "missing-dash".to_string();

        let new_parent = parent(&[
            "|RANDOM|.example.com",
            "www.|RANDOM|.example.com",
            "www.dev.|RANDOM|.example.com",
        ]);
        let plan = plan(&new_parent, &[stale.clone(), malformed.clone()]);

        let deleted: Vec<_> = plan.deletions.iter().map(|d| d.instance.name.clone()).collect();
        assert_eq!(deleted, vec![stale.name, malformed.name]);
        assert!(plan
            .deletions
            .iter()
            .all(|d| d.reason == ExpiryReason::SpecChanged));
        assert!(plan.creation.is_some());
        assert_eq!(plan.next_renewal_time, Some(now() + Duration::minutes(2)));
    }

    #[test]
    fn test_hard_expiry_deletes_and_recreates() {
        let parent = valid_parent();
        let expired = existing(&parent, "abc", Duration::minutes(2) + Duration::seconds(1));
        let plan = plan(&parent, &[expired.clone()]);

        assert_eq!(plan.deletions.len(), 1);
        assert_eq!(plan.deletions[0].instance, expired);
        assert_eq!(plan.deletions[0].reason, ExpiryReason::LifetimeExceeded);
        assert!(plan.creation.is_some());
    }

    #[test]
    fn test_invalid_spec_never_creates() {
        let parent = parent(&["norandom.example.com"]);
        let plan = plan(&parent, &[]);

        assert!(!plan.is_valid());
        assert_eq!(plan.validation_errors.len(), 1);
        assert!(plan.creation.is_none());
        assert_eq!(plan.next_renewal_time, None);
        assert_eq!(requeue_after(plan.next_renewal_time, now(), &policy()), None);
    }

    #[test]
    fn test_invalid_spec_still_deletes_stale() {
        let old_parent = valid_parent();
        let stale = existing(&old_parent, "abc", Duration::minutes(1));

        let parent = parent(&["norandom.example.com"]);
        let plan = plan(&parent, &[stale]);

        assert_eq!(plan.deletions.len(), 1);
        assert!(plan.creation.is_none());
        assert_eq!(plan.next_renewal_time, None);
    }

    #[test]
    fn test_newest_alive_instance_drives_renewal() {
        let parent = valid_parent();
        let older = existing(&parent, "aaa", Duration::seconds(90));
        let newer = existing(&parent, "bbb", Duration::seconds(30));
        let plan = plan(&parent, &[newer.clone(), older]);

        assert!(plan.creation.is_none());
        assert_eq!(
            plan.next_renewal_time,
            Some(newer.creation_time + Duration::minutes(2))
        );
    }

    #[test]
    fn test_newest_tie_broken_by_name() {
        let parent = valid_parent();
        let a = existing(&parent, "aaa", Duration::seconds(30));
        let b = existing(&parent, "bbb", Duration::seconds(30));

        let forward = newest(&[&a, &b]).map(|i| i.name.clone());
        let backward = newest(&[&b, &a]).map(|i| i.name.clone());
        assert_eq!(forward, Some(b.name.clone()));
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_renewal_past_time_range_is_an_error() {
        let parent = valid_parent();
        let far_future = DateTime::<Utc>::MAX_UTC - Duration::seconds(30);
        let err = plan_rotation(
            &parent,
            &[],
            far_future,
            &policy(),
            &FixedSource(RANDOM_ID),
            &DigestEncoder,
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidPolicy(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_overdue_requeue_is_negative() {
        let at = now() - Duration::seconds(5);
        assert_eq!(
            requeue_after(Some(at), now(), &policy()),
            Some(Duration::seconds(-15))
        );
    }
}
