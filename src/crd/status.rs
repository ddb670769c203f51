//! # Catalog Status
//!
//! Status types for tracking reconciliation state, conditions and the
//! children created for each source group.

use crate::conditions::{Condition, ConditionStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of the Catalog resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Children per group key, in dependency order
    /// Each entry records the observed readiness of one managed object
    #[serde(default)]
    pub inventory: BTreeMap<String, Vec<InventoryEntry>>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Last reconciliation time (RFC3339)
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
}

/// Observed state of one managed child
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    /// Kind of the child (GitRepository, ArtifactGenerator, ...)
    pub kind: String,
    /// Name of the child, in the Catalog namespace
    pub name: String,
    /// Readiness copied from the child's Ready condition
    #[serde(default)]
    pub ready: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl InventoryEntry {
    /// A member whose status has not been observed yet
    pub fn unknown(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ready: ConditionStatus::Unknown,
            reason: None,
            message: String::new(),
        }
    }
}
