//! # Catalog Orchestrator
//!
//! Turns every source of a Catalog into a chain of FluxCD objects and reports
//! the chain's readiness back on the Catalog.
//!
//! ## Module Structure
//!
//! - `children.rs` - Child kinds, manifests, readiness and create-or-update
//! - `context.rs` - Per-invocation state shared by the routines
//! - `routines.rs` - The reconcile pipeline
//! - `status.rs` - Ready condition derivation

mod children;
mod context;
mod routines;
mod status;

pub use children::{chain_for, readiness, ChildKind, Readiness, DEPENDENCY_ORDER};
pub use context::{CatalogRun, CatalogSettings};
pub use routines::{
    CheckSuspended, EnsureApplyJobs, EnsureGenerators, EnsureMirrors, ObserveArtifacts,
    PruneStaleChildren, ResolveGroups, Settle,
};
pub use status::catalog_ready;

use crate::conditions::Condition;
use crate::controller::lifecycle::{EnsureResult, Orchestrator, Outcome, RequeueHint};
use crate::controller::routine::{execute_reconcile_routine, Routine};
use crate::crd::{Catalog, InventoryEntry};
use crate::observability::Metrics;
use crate::store::{ObjectKey, ObjectStore};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CatalogOrchestrator {
    store: Arc<dyn ObjectStore>,
    metrics: Arc<Metrics>,
    settings: CatalogSettings,
}

impl std::fmt::Debug for CatalogOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogOrchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CatalogOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metrics: Arc<Metrics>,
        settings: CatalogSettings,
    ) -> Self {
        Self {
            store,
            metrics,
            settings,
        }
    }
}

#[async_trait]
impl Orchestrator<Catalog> for CatalogOrchestrator {
    async fn ensure_created(&self, catalog: &mut Catalog) -> EnsureResult {
        let mut run = CatalogRun::new(
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            self.settings,
            catalog.clone(),
        );
        let routines: [&dyn Routine<CatalogRun>; 8] = [
            &CheckSuspended,
            &ResolveGroups,
            &PruneStaleChildren,
            &EnsureMirrors,
            &EnsureGenerators,
            &ObserveArtifacts,
            &EnsureApplyJobs,
            &Settle,
        ];
        let result = execute_reconcile_routine(&mut run, &routines).await;

        let all_ready = run.all_ready();
        let CatalogRun {
            catalog: updated,
            interval,
            inventory,
            inventory_committed,
            suspended,
            ..
        } = run;
        *catalog = updated;
        if inventory_committed {
            commit_inventory(catalog, inventory);
        }

        match result {
            Err(err) => {
                warn!(error = %format!("{err:#}"), "Catalog pipeline failed");
                EnsureResult::failed(err)
            }
            Ok(_) if suspended => EnsureResult::success(RequeueHint::None),
            Ok(RequeueHint::None) if all_ready => {
                debug!(interval = ?interval, "All children ready");
                EnsureResult::success(RequeueHint::After(interval))
            }
            Ok(hint) => EnsureResult::pending(hint),
        }
    }

    async fn ensure_deleted(&self, catalog: &mut Catalog) -> EnsureResult {
        let namespace = catalog.metadata.namespace.clone().unwrap_or_default();
        let inventory = catalog
            .status
            .as_ref()
            .map(|status| status.inventory.clone())
            .unwrap_or_default();

        let mut children: Vec<(String, ChildKind, String)> = inventory
            .into_iter()
            .flat_map(|(key, entries)| {
                entries.into_iter().filter_map(move |entry| {
                    ChildKind::from_kind(&entry.kind)
                        .filter(|kind| kind.is_managed())
                        .map(|kind| (key.clone(), kind, entry.name))
                })
            })
            .collect();
        children.sort_by_key(|(_, kind, _)| std::cmp::Reverse(kind.rank()));

        let mut remaining = 0_usize;
        for (key, kind, name) in children {
            let resource = kind.api_resource();
            let object_key = ObjectKey::new(namespace.as_str(), name.as_str());
            let deleted = match self.store.get(&resource, &object_key).await {
                Ok(None) => continue,
                Ok(Some(existing)) if existing.metadata.deletion_timestamp.is_some() => {
                    remaining += 1;
                    continue;
                }
                Ok(Some(_)) => self.store.delete(&resource, &object_key).await,
                Err(err) => Err(err),
            };
            match deleted {
                Ok(()) => self.metrics.record_child_write(kind.as_str(), "delete"),
                Err(err) if err.is_not_found() => continue,
                Err(err) => {
                    return EnsureResult::failed(anyhow!(err).context(format!(
                        "deleting {} {name} (group {key})",
                        kind.as_str()
                    )))
                }
            }
            match self.store.get(&resource, &object_key).await {
                Ok(Some(_)) => remaining += 1,
                Ok(None) => {}
                Err(err) => {
                    return EnsureResult::failed(anyhow!(err).context(format!(
                        "checking deletion of {} {name} (group {key})",
                        kind.as_str()
                    )))
                }
            }
        }

        if remaining > 0 {
            info!(remaining, "Waiting for children to be deleted");
            EnsureResult::pending(RequeueHint::Immediate)
        } else {
            EnsureResult::success(RequeueHint::None)
        }
    }

    fn status(&self, catalog: &Catalog, outcome: &Outcome) -> Option<Vec<Condition>> {
        Some(vec![catalog_ready(catalog, outcome)])
    }
}

/// Persist fresh member lists plus bookkeeping fields
///
/// `lastReconcileTime` only moves when the inventory or the observed
/// generation changed, so a steady state produces no status write.
fn commit_inventory(catalog: &mut Catalog, inventory: BTreeMap<String, Vec<InventoryEntry>>) {
    let generation = catalog.metadata.generation;
    let status = catalog.status.get_or_insert_with(Default::default);
    if status.inventory != inventory || status.observed_generation != generation {
        status.inventory = inventory;
        status.observed_generation = generation;
        status.last_reconcile_time = Some(Utc::now().to_rfc3339());
    }
}
