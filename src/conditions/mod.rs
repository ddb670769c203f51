//! # Conditions
//!
//! Typed status conditions and the upsert-by-type list operations used by
//! every reconciliation step.
//!
//! A condition list holds at most one entry per `type`. Entries are created
//! by a reconciliation step, updated in place by later steps targeting the
//! same type, and only removed through explicit pruning
//! ([`remove_condition`]).
//!
//! `lastTransitionTime` only advances when `status` changes. Updating just the
//! reason or message keeps the original transition time.

mod aggregate;

pub use aggregate::aggregate_ready;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition type reporting overall readiness
pub const READY: &str = "Ready";
/// Condition type reporting cleanup progress while a resource is being deleted
pub const DELETE: &str = "Delete";
/// Condition type present while a resource is suspended
pub const SUSPENDED: &str = "Suspended";

/// Well-known condition reasons
pub mod reasons {
    pub const RECONCILED: &str = "Reconciled";
    pub const PENDING_RECONCILIATION: &str = "PendingReconciliation";
    pub const FAILING_RECONCILIATION: &str = "FailingReconciliation";
    pub const DELETED: &str = "Deleted";
    pub const PENDING_DELETION: &str = "PendingDeletion";
    pub const FAILING_DELETION: &str = "FailingDeletion";
    pub const SUCCEEDED: &str = "Succeeded";
    pub const PROGRESSING: &str = "Progressing";
    pub const DEPENDENCY_NOT_READY: &str = "DependencyNotReady";
    pub const RECONCILIATION_FAILED: &str = "ReconciliationFailed";
    pub const NO_SOURCES: &str = "NoSources";
    pub const SUSPENDED: &str = "Suspended";
}

/// Tri-state condition status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, schemars::JsonSchema,
)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    /// Parse the status string used by Kubernetes conditions; anything unexpected is `Unknown`
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Machine-readable reason for the last transition
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Last time the status changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Build a condition stamped with the current time
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Override the transition time
    #[must_use]
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.last_transition_time = time;
        self
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Status, reason or message differ
    fn differs_from(&self, other: &Condition) -> bool {
        self.status != other.status || self.reason != other.reason || self.message != other.message
    }
}

/// Upsert conditions by type
///
/// For each new condition an existing entry of the same type is replaced when
/// status, reason or message differ; the old `lastTransitionTime` is kept when
/// the status did not change. Unknown types are appended. Entries of other
/// types are never touched.
///
/// Returns `true` if the list changed.
pub fn set_conditions(
    conditions: &mut Vec<Condition>,
    new_conditions: impl IntoIterator<Item = Condition>,
) -> bool {
    let mut changed = false;
    for mut new in new_conditions {
        match conditions.iter_mut().find(|c| c.r#type == new.r#type) {
            Some(existing) => {
                if !existing.differs_from(&new) {
                    continue;
                }
                if existing.status == new.status {
                    new.last_transition_time = existing.last_transition_time;
                }
                *existing = new;
                changed = true;
            }
            None => {
                conditions.push(new);
                changed = true;
            }
        }
    }
    changed
}

#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

#[must_use]
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type).is_some_and(Condition::is_true)
}

/// Remove the condition of the given type. Returns `true` if one was removed.
pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.r#type != condition_type);
    conditions.len() != before
}
