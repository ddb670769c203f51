//! Per-invocation state shared by the catalog routines.

use super::children::{chain_for, ChildKind, Readiness};
use crate::conditions::ConditionStatus;
use crate::controller::grouping::SourceGroup;
use crate::crd::{Catalog, InventoryEntry};
use crate::observability::Metrics;
use crate::store::ObjectStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Timings the routines use when asking to be retried
#[derive(Debug, Clone, Copy)]
pub struct CatalogSettings {
    pub not_ready_retry: Duration,
    pub max_conflict_retries: u32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            not_ready_retry: Duration::from_secs(crate::constants::DEFAULT_NOT_READY_RETRY_SECS),
            max_conflict_retries: crate::constants::DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

pub struct CatalogRun {
    pub store: Arc<dyn ObjectStore>,
    pub metrics: Arc<Metrics>,
    pub settings: CatalogSettings,
    /// Working copy; routine changes to conditions flow back to the caller
    pub catalog: Catalog,
    /// Parsed `spec.interval`
    pub interval: Duration,
    pub groups: Vec<SourceGroup>,
    /// Fresh member lists, built by group resolution
    pub inventory: BTreeMap<String, Vec<InventoryEntry>>,
    /// Set once stale children are gone and `inventory` may replace the persisted one
    pub inventory_committed: bool,
    pub suspended: bool,
}

impl std::fmt::Debug for CatalogRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogRun")
            .field("catalog", &self.catalog.metadata.name)
            .field("groups", &self.groups.len())
            .field("inventory_committed", &self.inventory_committed)
            .field("suspended", &self.suspended)
            .finish_non_exhaustive()
    }
}

impl CatalogRun {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metrics: Arc<Metrics>,
        settings: CatalogSettings,
        catalog: Catalog,
    ) -> Self {
        Self {
            store,
            metrics,
            settings,
            catalog,
            interval: Duration::from_secs(crate::constants::MIN_CATALOG_INTERVAL_SECS),
            groups: Vec::new(),
            inventory: BTreeMap::new(),
            inventory_committed: false,
            suspended: false,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.catalog.metadata.namespace.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.catalog.metadata.name.as_deref().unwrap_or_default()
    }

    /// Inventory persisted by the previous reconciliation
    #[must_use]
    pub fn persisted_inventory(&self) -> BTreeMap<String, Vec<InventoryEntry>> {
        self.catalog
            .status
            .as_ref()
            .map(|status| status.inventory.clone())
            .unwrap_or_default()
    }

    /// Replace the member lists wholesale, every member `Unknown`
    pub fn reset_inventory(&mut self, groups: Vec<SourceGroup>) {
        self.inventory = groups
            .iter()
            .map(|group| {
                let members = chain_for(group.source.target)
                    .iter()
                    .map(|kind| InventoryEntry::unknown(kind.as_str(), &group.key))
                    .collect();
                (group.key.clone(), members)
            })
            .collect();
        self.groups = groups;
    }

    fn member_mut(&mut self, key: &str, kind: ChildKind) -> Option<&mut InventoryEntry> {
        self.inventory
            .get_mut(key)?
            .iter_mut()
            .find(|entry| entry.kind == kind.as_str())
    }

    #[must_use]
    pub fn member_status(&self, key: &str, kind: ChildKind) -> ConditionStatus {
        self.inventory
            .get(key)
            .and_then(|members| members.iter().find(|entry| entry.kind == kind.as_str()))
            .map_or(ConditionStatus::Unknown, |entry| entry.ready)
    }

    pub fn record(&mut self, key: &str, kind: ChildKind, readiness: Readiness) {
        if let Some(entry) = self.member_mut(key, kind) {
            entry.ready = readiness.status;
            entry.reason = readiness.reason;
            entry.message = readiness.message;
        }
    }

    pub fn record_waiting(&mut self, key: &str, kind: ChildKind, waiting_for: ChildKind) {
        self.record(
            key,
            kind,
            Readiness {
                status: ConditionStatus::Unknown,
                reason: None,
                message: format!("waiting for {}", waiting_for.as_str()),
            },
        );
    }

    /// Every member of every group is Ready
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.inventory
            .values()
            .flatten()
            .all(|entry| entry.ready == ConditionStatus::True)
    }
}
