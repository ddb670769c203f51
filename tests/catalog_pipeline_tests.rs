//! # Catalog Pipeline Tests
//!
//! Drives the Catalog orchestrator through the lifecycle state machine against
//! the in-memory store, playing the part of FluxCD by writing child statuses.

mod common;

use catalog_controller::conditions::{self, find_condition, reasons, ConditionStatus};
use catalog_controller::constants::{
    CATALOG_FINALIZER, CATALOG_NAME_LABEL, GROUP_KEY_LABEL, MANAGED_BY_LABEL, SUSPEND_ANNOTATION,
};
use catalog_controller::controller::catalog::ChildKind;
use catalog_controller::controller::lifecycle::{ReconcileError, RequeueHint};
use catalog_controller::crd::ApplyTarget;
use catalog_controller::store::{update_typed, ObjectKey, ObjectStore, StoreOperation};
use common::*;
use std::time::Duration;

const WIDGETS: &str = "https://github.com/acme/widgets";
const GADGETS: &str = "https://github.com/acme/gadgets";

#[tokio::test]
async fn test_single_source_converges_to_ready() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0")];
    let key = keys("platform", &sources).remove(0);
    harness.apply(&catalog("platform", sources)).await;

    // Finalizer first, nothing else
    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    let stored = harness.catalog("platform").await.unwrap();
    assert_eq!(
        stored.metadata.finalizers.as_deref(),
        Some(&[CATALOG_FINALIZER.to_string()][..])
    );
    assert!(harness.child(ChildKind::GitRepository, &key).await.is_none());

    // Mirror created, chain waits for it
    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    let mirror = harness.child(ChildKind::GitRepository, &key).await.unwrap();
    assert_eq!(mirror.data["spec"]["url"], WIDGETS);
    assert_eq!(mirror.data["spec"]["ref"]["tag"], "v1.2.0");
    assert_eq!(mirror.data["spec"]["interval"], "600s");
    let labels = mirror.metadata.labels.clone().unwrap();
    assert_eq!(labels[MANAGED_BY_LABEL], "catalog-controller");
    assert_eq!(labels[CATALOG_NAME_LABEL], "platform");
    assert_eq!(labels[GROUP_KEY_LABEL], key);
    let owner = &mirror.metadata.owner_references.clone().unwrap()[0];
    assert_eq!(owner.kind, "Catalog");
    assert_eq!(owner.controller, Some(true));

    let stored = harness.catalog("platform").await.unwrap();
    let status = stored.status.unwrap();
    let ready = find_condition(&status.conditions, conditions::READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::Unknown);
    assert_eq!(ready.reason, reasons::PROGRESSING);
    assert_eq!(ready.message, format!("waiting for GitRepository {key} (group {key})"));
    assert_eq!(status.inventory[&key].len(), 4);

    // Mirror ready: generator created
    harness.set_child_status(ChildKind::GitRepository, &key, ready_status("stored"));
    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    let generator = harness.child(ChildKind::ArtifactGenerator, &key).await.unwrap();
    assert_eq!(generator.data["spec"]["sources"][0]["name"], key.as_str());
    assert_eq!(generator.data["spec"]["artifacts"][0]["name"], key.as_str());

    // Generator ready but no artifact published yet
    harness.set_child_status(ChildKind::ArtifactGenerator, &key, ready_status("generated"));
    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    assert!(harness.child(ChildKind::Kustomization, &key).await.is_none());

    // Artifact published: apply job created
    harness.publish_artifact(&key).await;
    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    let apply = harness.child(ChildKind::Kustomization, &key).await.unwrap();
    assert_eq!(apply.data["spec"]["sourceRef"]["kind"], "ExternalArtifact");
    assert_eq!(apply.data["spec"]["sourceRef"]["name"], key.as_str());
    assert_eq!(apply.data["spec"]["prune"], true);

    // Everything ready: scheduled for the next interval
    harness.set_child_status(ChildKind::Kustomization, &key, ready_status("applied"));
    assert_eq!(
        harness.reconcile("platform").await.unwrap(),
        RequeueHint::After(Duration::from_secs(600))
    );

    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    let ready = find_condition(&status.conditions, conditions::READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::True);
    assert_eq!(ready.reason, reasons::SUCCEEDED);
    assert_eq!(ready.message, "4 managed objects are ready");
    assert_eq!(status.observed_generation, Some(1));
    assert!(status.last_reconcile_time.is_some());
    assert_eq!(harness.metrics.child_writes("GitRepository", "create"), 1);
}

#[tokio::test]
async fn test_steady_state_performs_no_writes() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0")];
    let key = keys("platform", &sources).remove(0);
    harness.apply(&catalog("platform", sources)).await;
    harness.converge("platform", &key, ChildKind::Kustomization).await;

    let before = harness.catalog("platform").await.unwrap().status.unwrap();
    let writes = harness.store.write_count();

    assert_eq!(
        harness.reconcile("platform").await.unwrap(),
        RequeueHint::After(Duration::from_secs(600))
    );
    assert_eq!(
        harness.reconcile("platform").await.unwrap(),
        RequeueHint::After(Duration::from_secs(600))
    );

    assert_eq!(harness.store.write_count(), writes);
    let after = harness.catalog("platform").await.unwrap().status.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_failing_child_surfaces_on_catalog() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0")];
    let key = keys("platform", &sources).remove(0);
    harness.apply(&catalog("platform", sources)).await;
    harness.reconcile("platform").await.unwrap();
    harness.reconcile("platform").await.unwrap();

    harness.set_child_status(
        ChildKind::GitRepository,
        &key,
        failed_status("GitOperationFailed", "authentication required"),
    );

    assert_eq!(
        harness.reconcile("platform").await.unwrap(),
        RequeueHint::After(Duration::from_secs(30))
    );
    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    let ready = find_condition(&status.conditions, conditions::READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, "GitOperationFailed");
    assert_eq!(
        ready.message,
        format!("GitRepository {key} (group {key}) is not ready: authentication required")
    );
    assert!(harness.child(ChildKind::ArtifactGenerator, &key).await.is_none());

    let generator = status.inventory[&key]
        .iter()
        .find(|entry| entry.kind == "ArtifactGenerator")
        .unwrap();
    assert_eq!(generator.ready, ConditionStatus::Unknown);
    assert_eq!(generator.message, "waiting for GitRepository");
}

#[tokio::test]
async fn test_first_failure_in_dependency_order_wins() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0"), source(GADGETS, "v0.4.0")];
    let group_keys = keys("platform", &sources);
    harness.apply(&catalog("platform", sources)).await;
    harness.reconcile("platform").await.unwrap();
    harness.reconcile("platform").await.unwrap();

    harness.set_child_status(ChildKind::GitRepository, &group_keys[0], ready_status("stored"));
    harness.set_child_status(
        ChildKind::GitRepository,
        &group_keys[1],
        failed_status("GitOperationFailed", "repository not found"),
    );

    // The first group moves on to its generator, which has no status yet
    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    assert!(harness
        .child(ChildKind::ArtifactGenerator, &group_keys[0])
        .await
        .is_some());

    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    let ready = find_condition(&status.conditions, conditions::READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert!(ready.message.starts_with(&format!("GitRepository {}", group_keys[1])));
}

#[tokio::test]
async fn test_zero_sources_is_ready() {
    let harness = Harness::new();
    harness.apply(&catalog("empty", Vec::new())).await;

    harness.reconcile("empty").await.unwrap();
    assert_eq!(
        harness.reconcile("empty").await.unwrap(),
        RequeueHint::After(Duration::from_secs(600))
    );

    let status = harness.catalog("empty").await.unwrap().status.unwrap();
    let ready = find_condition(&status.conditions, conditions::READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::True);
    assert_eq!(ready.reason, reasons::NO_SOURCES);
}

#[tokio::test]
async fn test_duplicate_sources_are_rejected() {
    let harness = Harness::new();
    let sources = vec![
        source(WIDGETS, "v1.2.0"),
        source("git@github.com:acme/widgets.git", "v1.2.0"),
    ];
    harness.apply(&catalog("platform", sources)).await;
    harness.reconcile("platform").await.unwrap();

    let err = harness.reconcile("platform").await.unwrap_err();
    assert!(matches!(err, ReconcileError::Business(_)));

    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    let ready = find_condition(&status.conditions, conditions::READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, reasons::RECONCILIATION_FAILED);
    assert!(ready.message.starts_with("invalid catalog sources"));
    assert!(status.inventory.is_empty());
    assert!(harness
        .store
        .list(&ChildKind::GitRepository.api_resource())
        .is_empty());
}

#[tokio::test]
async fn test_short_interval_is_rejected() {
    let harness = Harness::new();
    let mut short = catalog("platform", vec![source(WIDGETS, "v1.2.0")]);
    short.spec.interval = "30s".to_string();
    harness.apply(&short).await;
    harness.reconcile("platform").await.unwrap();

    let err = harness.reconcile("platform").await.unwrap_err();

    assert!(err.to_string().contains("spec.interval"));
}

#[tokio::test]
async fn test_suspend_annotation_stops_pipeline() {
    let harness = Harness::new();
    let mut suspended = catalog("platform", vec![source(WIDGETS, "v1.2.0")]);
    suspended.metadata.annotations =
        Some([(SUSPEND_ANNOTATION.to_string(), "true".to_string())].into());
    harness.apply(&suspended).await;
    harness.reconcile("platform").await.unwrap();

    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::None);
    let stored = harness.catalog("platform").await.unwrap();
    let status = stored.status.clone().unwrap();
    assert!(conditions::is_condition_true(&status.conditions, conditions::SUSPENDED));
    assert!(harness
        .store
        .list(&ChildKind::GitRepository.api_resource())
        .is_empty());

    // Resuming prunes the Suspended condition and starts the chain
    let mut resumed = stored;
    resumed.metadata.annotations = None;
    update_typed(harness.store.as_ref(), &resumed).await.unwrap();

    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    assert!(find_condition(&status.conditions, conditions::SUSPENDED).is_none());
    assert_eq!(
        harness
            .store
            .list(&ChildKind::GitRepository.api_resource())
            .len(),
        1
    );
}

#[tokio::test]
async fn test_removed_source_is_pruned() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0"), source(GADGETS, "v0.4.0")];
    let group_keys = keys("platform", &sources);
    harness.apply(&catalog("platform", sources)).await;
    harness.reconcile("platform").await.unwrap();
    harness.reconcile("platform").await.unwrap();
    assert!(harness.child(ChildKind::GitRepository, &group_keys[1]).await.is_some());

    let mut stored = harness.catalog("platform").await.unwrap();
    stored.spec.sources.truncate(1);
    update_typed(harness.store.as_ref(), &stored).await.unwrap();
    harness.reconcile("platform").await.unwrap();

    assert!(harness.child(ChildKind::GitRepository, &group_keys[0]).await.is_some());
    assert!(harness.child(ChildKind::GitRepository, &group_keys[1]).await.is_none());
    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    assert_eq!(status.inventory.keys().collect::<Vec<_>>(), vec![&group_keys[0]]);
    assert_eq!(status.observed_generation, Some(2));
    assert_eq!(harness.metrics.child_writes("GitRepository", "delete"), 1);
}

#[tokio::test]
async fn test_failed_prune_keeps_stale_child_in_inventory() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0"), source(GADGETS, "v0.4.0")];
    let group_keys = keys("platform", &sources);
    harness.apply(&catalog("platform", sources)).await;
    harness.reconcile("platform").await.unwrap();
    harness.reconcile("platform").await.unwrap();

    let mut stored = harness.catalog("platform").await.unwrap();
    stored.spec.sources.truncate(1);
    update_typed(harness.store.as_ref(), &stored).await.unwrap();
    harness
        .store
        .fail("GitRepository", StoreOperation::Delete, "forbidden");

    assert!(harness.reconcile("platform").await.is_err());
    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    assert!(status.inventory.contains_key(&group_keys[1]));

    harness.store.clear_failures();
    harness.reconcile("platform").await.unwrap();
    assert!(harness.child(ChildKind::GitRepository, &group_keys[1]).await.is_none());
    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    assert!(!status.inventory.contains_key(&group_keys[1]));
}

#[tokio::test]
async fn test_finalizing_stale_child_stays_in_inventory_until_gone() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0"), source(GADGETS, "v0.4.0")];
    let group_keys = keys("platform", &sources);
    harness.apply(&catalog("platform", sources)).await;
    harness.reconcile("platform").await.unwrap();
    harness.reconcile("platform").await.unwrap();

    let resource = ChildKind::GitRepository.api_resource();
    let mut mirror = harness.child(ChildKind::GitRepository, &group_keys[1]).await.unwrap();
    mirror.metadata.finalizers = Some(vec!["finalizers.fluxcd.io".to_string()]);
    harness.store.update(&resource, &mirror).await.unwrap();

    let mut stored = harness.catalog("platform").await.unwrap();
    stored.spec.sources.truncate(1);
    update_typed(harness.store.as_ref(), &stored).await.unwrap();

    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    let mirror = harness.child(ChildKind::GitRepository, &group_keys[1]).await.unwrap();
    assert!(mirror.metadata.deletion_timestamp.is_some());
    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    let lingering = &status.inventory[&group_keys[1]];
    assert_eq!(lingering.len(), 1);
    assert_eq!(lingering[0].kind, "GitRepository");
    assert_eq!(lingering[0].ready, ConditionStatus::Unknown);
    let ready = find_condition(&status.conditions, conditions::READY).unwrap();
    assert_ne!(ready.status, ConditionStatus::True);

    // Still finalizing: no second delete request
    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    assert_eq!(harness.metrics.child_writes("GitRepository", "delete"), 1);
    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    assert!(status.inventory.contains_key(&group_keys[1]));

    // Flux releases its finalizer
    let mut mirror = harness.child(ChildKind::GitRepository, &group_keys[1]).await.unwrap();
    mirror.metadata.finalizers = None;
    harness.store.update(&resource, &mirror).await.unwrap();
    assert!(harness.child(ChildKind::GitRepository, &group_keys[1]).await.is_none());

    harness.reconcile("platform").await.unwrap();
    let status = harness.catalog("platform").await.unwrap().status.unwrap();
    assert_eq!(status.inventory.keys().collect::<Vec<_>>(), vec![&group_keys[0]]);
}

#[tokio::test]
async fn test_target_change_replaces_apply_job() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0")];
    let key = keys("platform", &sources).remove(0);
    harness.apply(&catalog("platform", sources)).await;
    harness.converge("platform", &key, ChildKind::Kustomization).await;

    let mut stored = harness.catalog("platform").await.unwrap();
    stored.spec.sources[0].target = ApplyTarget::HelmRelease;
    update_typed(harness.store.as_ref(), &stored).await.unwrap();

    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    assert!(harness.child(ChildKind::Kustomization, &key).await.is_none());
    let release = harness.child(ChildKind::HelmRelease, &key).await.unwrap();
    assert_eq!(release.data["spec"]["chartRef"]["kind"], "ExternalArtifact");
    assert_eq!(release.data["spec"]["chartRef"]["name"], key.as_str());
}

#[tokio::test]
async fn test_deletion_removes_children_then_finalizer() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0")];
    let key = keys("platform", &sources).remove(0);
    harness.apply(&catalog("platform", sources)).await;
    harness.converge("platform", &key, ChildKind::Kustomization).await;

    let catalog_key = ObjectKey::new(NAMESPACE, "platform");
    harness
        .store
        .delete(&catalog_resource(), &catalog_key)
        .await
        .unwrap();

    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    for kind in [ChildKind::GitRepository, ChildKind::ArtifactGenerator, ChildKind::Kustomization] {
        assert!(harness.child(kind, &key).await.is_none(), "{} left behind", kind.as_str());
    }
    // Produced by the generator; not ours to delete
    assert!(harness.child(ChildKind::ExternalArtifact, &key).await.is_some());

    let stored = harness.catalog("platform").await.unwrap();
    let delete = find_condition(&stored.status.unwrap().conditions, conditions::DELETE)
        .cloned()
        .unwrap();
    assert_eq!(delete.status, ConditionStatus::True);
    assert_eq!(delete.reason, reasons::DELETED);

    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::None);
    assert!(harness.catalog("platform").await.is_none());
}

#[tokio::test]
async fn test_deletion_waits_for_blocked_child() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0")];
    let key = keys("platform", &sources).remove(0);
    harness.apply(&catalog("platform", sources)).await;
    harness.converge("platform", &key, ChildKind::Kustomization).await;

    let resource = ChildKind::Kustomization.api_resource();
    let mut apply = harness.child(ChildKind::Kustomization, &key).await.unwrap();
    apply.metadata.finalizers = Some(vec!["finalizers.fluxcd.io".to_string()]);
    harness.store.update(&resource, &apply).await.unwrap();

    harness
        .store
        .delete(&catalog_resource(), &ObjectKey::new(NAMESPACE, "platform"))
        .await
        .unwrap();

    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    let stored = harness.catalog("platform").await.unwrap();
    assert!(stored
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.contains(&CATALOG_FINALIZER.to_string())));
    let delete = find_condition(&stored.status.unwrap().conditions, conditions::DELETE)
        .cloned()
        .unwrap();
    assert_eq!(delete.status, ConditionStatus::False);
    assert_eq!(delete.reason, reasons::PENDING_DELETION);

    // Flux finishes its own cleanup
    let mut apply = harness.child(ChildKind::Kustomization, &key).await.unwrap();
    apply.metadata.finalizers = None;
    harness.store.update(&resource, &apply).await.unwrap();

    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::Immediate);
    assert_eq!(harness.reconcile("platform").await.unwrap(), RequeueHint::None);
    assert!(harness.catalog("platform").await.is_none());
}

#[tokio::test]
async fn test_failed_child_deletion_keeps_finalizer() {
    let harness = Harness::new();
    let sources = vec![source(WIDGETS, "v1.2.0")];
    let key = keys("platform", &sources).remove(0);
    harness.apply(&catalog("platform", sources)).await;
    harness.converge("platform", &key, ChildKind::Kustomization).await;
    harness
        .store
        .delete(&catalog_resource(), &ObjectKey::new(NAMESPACE, "platform"))
        .await
        .unwrap();
    harness
        .store
        .fail("Kustomization", StoreOperation::Delete, "forbidden");

    let err = harness.reconcile("platform").await.unwrap_err();
    assert!(matches!(err, ReconcileError::Business(_)));

    let stored = harness.catalog("platform").await.unwrap();
    assert!(stored.metadata.finalizers.is_some());
    let delete = find_condition(&stored.status.unwrap().conditions, conditions::DELETE)
        .cloned()
        .unwrap();
    assert_eq!(delete.reason, reasons::FAILING_DELETION);
    assert!(delete.message.contains(&format!("deleting Kustomization {key}")));
}
