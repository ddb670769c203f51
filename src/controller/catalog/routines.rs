//! # Catalog Routines
//!
//! The reconcile pipeline of a Catalog, one routine per stage of the chain.

use super::children::{
    desired_object, readiness, upsert_child, ChildKind, ManifestContext, Readiness, Write,
};
use super::context::CatalogRun;
use crate::conditions::{
    self, reasons, remove_condition, set_conditions, Condition, ConditionStatus,
};
use crate::constants::{MIN_CATALOG_INTERVAL_SECS, SUSPEND_ANNOTATION};
use crate::controller::grouping::{resolve_groups, SourceGroup};
use crate::controller::routine::{Routine, RoutineResult};
use crate::controller::validation::validate_duration_interval;
use crate::crd::InventoryEntry;
use crate::store::ObjectKey;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Stops the pipeline while the suspend annotation is set
#[derive(Debug)]
pub struct CheckSuspended;

#[async_trait]
impl Routine<CatalogRun> for CheckSuspended {
    fn name(&self) -> &'static str {
        "check-suspended"
    }

    async fn run(&self, ctx: &mut CatalogRun) -> RoutineResult {
        let suspended = ctx
            .catalog
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(SUSPEND_ANNOTATION))
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));

        let status = ctx.catalog.status.get_or_insert_with(Default::default);
        if suspended {
            set_conditions(
                &mut status.conditions,
                [Condition::new(
                    conditions::SUSPENDED,
                    ConditionStatus::True,
                    reasons::SUSPENDED,
                    format!("reconciliation suspended by annotation {SUSPEND_ANNOTATION}"),
                )],
            );
            ctx.suspended = true;
            info!(catalog = ctx.name(), "Catalog is suspended, skipping reconciliation");
            return RoutineResult::Exit;
        }

        remove_condition(&mut status.conditions, conditions::SUSPENDED);
        RoutineResult::Continue
    }
}

/// Validates the spec and derives one group per source
#[derive(Debug)]
pub struct ResolveGroups;

#[async_trait]
impl Routine<CatalogRun> for ResolveGroups {
    fn name(&self) -> &'static str {
        "resolve-groups"
    }

    async fn run(&self, ctx: &mut CatalogRun) -> RoutineResult {
        ctx.interval = match validate_duration_interval(
            &ctx.catalog.spec.interval,
            "spec.interval",
            MIN_CATALOG_INTERVAL_SECS,
        ) {
            Ok(interval) => interval,
            Err(err) => return RoutineResult::Break(err),
        };

        match resolve_groups(ctx.name(), &ctx.catalog.spec.sources) {
            Ok(groups) => {
                debug!(catalog = ctx.name(), groups = groups.len(), "Resolved source groups");
                ctx.reset_inventory(groups);
                RoutineResult::Continue
            }
            Err(err) => RoutineResult::Break(anyhow!(err).context("invalid catalog sources")),
        }
    }
}

/// Deletes children of the persisted inventory that are no longer desired
#[derive(Debug)]
pub struct PruneStaleChildren;

#[async_trait]
impl Routine<CatalogRun> for PruneStaleChildren {
    fn name(&self) -> &'static str {
        "prune-stale-children"
    }

    async fn run(&self, ctx: &mut CatalogRun) -> RoutineResult {
        let desired: HashSet<(String, String)> = ctx
            .inventory
            .values()
            .flatten()
            .map(|entry| (entry.kind.clone(), entry.name.clone()))
            .collect();

        let mut stale: Vec<(String, ChildKind, String)> = Vec::new();
        for (key, entries) in ctx.persisted_inventory() {
            for entry in entries {
                if desired.contains(&(entry.kind.clone(), entry.name.clone())) {
                    continue;
                }
                match ChildKind::from_kind(&entry.kind) {
                    Some(kind) if kind.is_managed() => stale.push((key.clone(), kind, entry.name)),
                    Some(_) => {}
                    None => warn!(
                        kind = %entry.kind,
                        name = %entry.name,
                        "Unknown kind in inventory, leaving it alone"
                    ),
                }
            }
        }
        // Dependents first
        stale.sort_by_key(|(_, kind, _)| std::cmp::Reverse(kind.rank()));

        let mut lingering = Vec::new();
        for (key, kind, name) in stale {
            let resource = kind.api_resource();
            let object_key = ObjectKey::new(ctx.namespace(), &name);
            let context = || format!("deleting stale {} {name} (group {key})", kind.as_str());

            let existing = match ctx.store.get(&resource, &object_key).await {
                Ok(existing) => existing,
                Err(err) => return RoutineResult::Break(anyhow!(err).context(context())),
            };
            let Some(existing) = existing else {
                continue;
            };

            if existing.metadata.deletion_timestamp.is_none() {
                match ctx.store.delete(&resource, &object_key).await {
                    Ok(()) => {
                        ctx.metrics.record_child_write(kind.as_str(), "delete");
                        info!(
                            group = %key,
                            kind = kind.as_str(),
                            name = %name,
                            "Deleted stale child"
                        );
                    }
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return RoutineResult::Break(anyhow!(err).context(context())),
                }
                match ctx.store.get(&resource, &object_key).await {
                    Ok(None) => continue,
                    Ok(Some(_)) => {}
                    Err(err) => return RoutineResult::Break(anyhow!(err).context(context())),
                }
            }
            lingering.push((key, kind, name));
        }

        // Children still finalizing stay in the inventory until they are gone
        let waiting = !lingering.is_empty();
        for (key, kind, name) in lingering {
            debug!(
                group = %key,
                kind = kind.as_str(),
                name = %name,
                "Stale child is still finalizing"
            );
            let mut entry = InventoryEntry::unknown(kind.as_str(), name);
            entry.message = "waiting for deletion".to_string();
            ctx.inventory.entry(key).or_default().push(entry);
        }

        ctx.inventory_committed = true;
        if waiting {
            RoutineResult::Requeue
        } else {
            RoutineResult::Continue
        }
    }
}

/// Which member of each group a chain stage handles
#[derive(Debug, Clone, Copy)]
enum Stage {
    Mirror,
    Generator,
    Artifact,
    Apply,
}

impl Stage {
    fn kind(self, group: &SourceGroup) -> ChildKind {
        match self {
            Stage::Mirror => ChildKind::GitRepository,
            Stage::Generator => ChildKind::ArtifactGenerator,
            Stage::Artifact => ChildKind::ExternalArtifact,
            Stage::Apply => ChildKind::from(group.source.target),
        }
    }

    fn predecessor(self) -> Option<ChildKind> {
        match self {
            Stage::Mirror => None,
            Stage::Generator => Some(ChildKind::GitRepository),
            Stage::Artifact => Some(ChildKind::ArtifactGenerator),
            Stage::Apply => Some(ChildKind::ExternalArtifact),
        }
    }
}

/// Run one chain stage over every group whose predecessor is Ready
async fn ensure_stage(ctx: &mut CatalogRun, stage: Stage) -> RoutineResult {
    let manifests = ManifestContext::for_catalog(&ctx.catalog, ctx.interval);
    let mut requeue = false;

    for group in ctx.groups.clone() {
        let kind = stage.kind(&group);
        let key = group.key.as_str();

        if let Some(predecessor) = stage.predecessor() {
            if ctx.member_status(key, predecessor) != ConditionStatus::True {
                ctx.record_waiting(key, kind, predecessor);
                continue;
            }
        }

        let result = if kind.is_managed() {
            let desired = desired_object(kind, &group, &manifests);
            upsert_child(
                ctx.store.as_ref(),
                kind,
                &desired,
                ctx.settings.max_conflict_retries,
            )
            .await
            .map(Some)
        } else {
            ctx.store
                .get(&kind.api_resource(), &ObjectKey::new(ctx.namespace(), key))
                .await
                .map(|found| found.map(|object| (object, Write::Unchanged)))
        };

        let observed = match result
            .with_context(|| format!("ensuring {} {key} (group {key})", kind.as_str()))
        {
            Ok(observed) => observed,
            Err(err) => {
                ctx.record(
                    key,
                    kind,
                    Readiness {
                        status: ConditionStatus::False,
                        reason: Some(reasons::RECONCILIATION_FAILED.to_string()),
                        message: format!("{err:#}"),
                    },
                );
                return RoutineResult::Break(err);
            }
        };

        let Some((object, write)) = observed else {
            // Produced by the generator, not by us
            ctx.record_waiting(key, kind, ChildKind::ArtifactGenerator);
            requeue = true;
            continue;
        };

        if write != Write::Unchanged {
            ctx.metrics.record_child_write(kind.as_str(), write.as_str());
            info!(
                group = key,
                kind = kind.as_str(),
                operation = write.as_str(),
                "Reconciled child"
            );
        }

        let observed = readiness(&object);
        if write == Write::Created || observed.status == ConditionStatus::Unknown {
            requeue = true;
        }
        ctx.record(key, kind, observed);
    }

    if requeue {
        RoutineResult::Requeue
    } else {
        RoutineResult::Continue
    }
}

/// Mirrors every group's repository with a GitRepository
#[derive(Debug)]
pub struct EnsureMirrors;

#[async_trait]
impl Routine<CatalogRun> for EnsureMirrors {
    fn name(&self) -> &'static str {
        "ensure-mirrors"
    }

    async fn run(&self, ctx: &mut CatalogRun) -> RoutineResult {
        ensure_stage(ctx, Stage::Mirror).await
    }
}

/// Packages the source path of every mirrored group into an artifact
#[derive(Debug)]
pub struct EnsureGenerators;

#[async_trait]
impl Routine<CatalogRun> for EnsureGenerators {
    fn name(&self) -> &'static str {
        "ensure-generators"
    }

    async fn run(&self, ctx: &mut CatalogRun) -> RoutineResult {
        ensure_stage(ctx, Stage::Generator).await
    }
}

/// Observes the ExternalArtifact each generator produces
#[derive(Debug)]
pub struct ObserveArtifacts;

#[async_trait]
impl Routine<CatalogRun> for ObserveArtifacts {
    fn name(&self) -> &'static str {
        "observe-artifacts"
    }

    async fn run(&self, ctx: &mut CatalogRun) -> RoutineResult {
        ensure_stage(ctx, Stage::Artifact).await
    }
}

/// Applies every ready artifact with a Kustomization or HelmRelease
#[derive(Debug)]
pub struct EnsureApplyJobs;

#[async_trait]
impl Routine<CatalogRun> for EnsureApplyJobs {
    fn name(&self) -> &'static str {
        "ensure-apply-jobs"
    }

    async fn run(&self, ctx: &mut CatalogRun) -> RoutineResult {
        ensure_stage(ctx, Stage::Apply).await
    }
}

/// Waits out children that report not ready
#[derive(Debug)]
pub struct Settle;

#[async_trait]
impl Routine<CatalogRun> for Settle {
    fn name(&self) -> &'static str {
        "settle"
    }

    async fn run(&self, ctx: &mut CatalogRun) -> RoutineResult {
        if ctx.all_ready() {
            RoutineResult::Continue
        } else {
            RoutineResult::RequeueAfter(ctx.settings.not_ready_retry)
        }
    }
}
