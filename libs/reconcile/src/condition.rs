//! Status condition bookkeeping.

use chrono::{DateTime, Utc};

use crate::types::{Condition, ConditionStatus, ConditionType, ObservedStatus};

/// Build a condition observed at `now`. Both timestamps start at `now`.
pub fn new_condition(
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: impl Into<String>,
    now: DateTime<Utc>,
) -> Condition {
    Condition {
        condition_type,
        status,
        reason: reason.into(),
        message: message.into(),
        last_heartbeat_time: now,
        last_transition_time: now,
    }
}

/// Merge `condition` into `status`, returning the updated status.
///
/// - No existing condition of that type: appended.
/// - Same status, reason and message: left untouched, heartbeat included.
/// - Same status, different reason or message: replaced in place, keeping the
///   previous transition time.
/// - Different status: replaced in place as given.
///
/// Other conditions keep their position.
pub fn set_condition(mut status: ObservedStatus, mut condition: Condition) -> ObservedStatus {
    let existing = status
        .conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type);

    match existing {
        None => status.conditions.push(condition),
        Some(current)
            if current.status == condition.status
                && current.reason == condition.reason
                && current.message == condition.message => {}
        Some(current) => {
            if current.status == condition.status {
                condition.last_transition_time = current.last_transition_time;
            }
            *current = condition;
        }
    }

    status
}
