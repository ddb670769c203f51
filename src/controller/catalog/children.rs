//! # Catalog Children
//!
//! The FluxCD object kinds a source group is materialised as, their manifests
//! and how their readiness is read back.
//!
//! ```text
//! GitRepository -> ArtifactGenerator -> ExternalArtifact -> Kustomization | HelmRelease
//! ```

use crate::conditions::ConditionStatus;
use crate::constants::{CATALOG_NAME_LABEL, CONTROLLER_NAME, GROUP_KEY_LABEL, MANAGED_BY_LABEL};
use crate::controller::grouping::SourceGroup;
use crate::crd::{ApplyTarget, Catalog};
use crate::store::{retry_on_conflict, ObjectKey, ObjectStore, StoreError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ApiResource;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::Resource;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Alias of the mirrored repository inside the generator
const SOURCE_ALIAS: &str = "repo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    GitRepository,
    ArtifactGenerator,
    ExternalArtifact,
    Kustomization,
    HelmRelease,
}

/// Every child kind in dependency order
pub const DEPENDENCY_ORDER: [ChildKind; 5] = [
    ChildKind::GitRepository,
    ChildKind::ArtifactGenerator,
    ChildKind::ExternalArtifact,
    ChildKind::Kustomization,
    ChildKind::HelmRelease,
];

impl ChildKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChildKind::GitRepository => "GitRepository",
            ChildKind::ArtifactGenerator => "ArtifactGenerator",
            ChildKind::ExternalArtifact => "ExternalArtifact",
            ChildKind::Kustomization => "Kustomization",
            ChildKind::HelmRelease => "HelmRelease",
        }
    }

    #[must_use]
    pub fn from_kind(kind: &str) -> Option<Self> {
        DEPENDENCY_ORDER.into_iter().find(|k| k.as_str() == kind)
    }

    #[must_use]
    pub fn gvk(self) -> GroupVersionKind {
        let (group, version) = match self {
            ChildKind::GitRepository | ChildKind::ExternalArtifact => {
                ("source.toolkit.fluxcd.io", "v1")
            }
            ChildKind::ArtifactGenerator => ("source.extensions.fluxcd.io", "v1beta1"),
            ChildKind::Kustomization => ("kustomize.toolkit.fluxcd.io", "v1"),
            ChildKind::HelmRelease => ("helm.toolkit.fluxcd.io", "v2"),
        };
        GroupVersionKind::gvk(group, version, self.as_str())
    }

    #[must_use]
    pub fn api_resource(self) -> ApiResource {
        ApiResource::from_gvk(&self.gvk())
    }

    /// `false` for kinds produced by another controller and only observed
    #[must_use]
    pub fn is_managed(self) -> bool {
        self != ChildKind::ExternalArtifact
    }

    /// Position in the dependency order
    #[must_use]
    pub fn rank(self) -> usize {
        DEPENDENCY_ORDER
            .iter()
            .position(|k| *k == self)
            .unwrap_or(DEPENDENCY_ORDER.len())
    }
}

impl From<ApplyTarget> for ChildKind {
    fn from(target: ApplyTarget) -> Self {
        match target {
            ApplyTarget::Kustomization => ChildKind::Kustomization,
            ApplyTarget::HelmRelease => ChildKind::HelmRelease,
        }
    }
}

/// The ordered chain for one group
#[must_use]
pub fn chain_for(target: ApplyTarget) -> [ChildKind; 4] {
    [
        ChildKind::GitRepository,
        ChildKind::ArtifactGenerator,
        ChildKind::ExternalArtifact,
        ChildKind::from(target),
    ]
}

/// Readiness of a child as reported by its own controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub status: ConditionStatus,
    pub reason: Option<String>,
    pub message: String,
}

/// Read the `Ready` condition of a child
///
/// A child whose controller has not observed its latest generation, or that
/// reports no `Ready` condition yet, is `Unknown`.
#[must_use]
pub fn readiness(object: &DynamicObject) -> Readiness {
    let status = object.data.get("status");
    let observed = status
        .and_then(|s| s.get("observedGeneration"))
        .and_then(Value::as_i64);

    if let (Some(generation), Some(observed)) = (object.metadata.generation, observed) {
        if observed < generation {
            return Readiness {
                status: ConditionStatus::Unknown,
                reason: None,
                message: format!("generation {generation} not observed yet (observed {observed})"),
            };
        }
    }

    let ready = status
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.get("type").and_then(Value::as_str) == Some(crate::conditions::READY))
        });

    match ready {
        Some(condition) => Readiness {
            status: ConditionStatus::parse(
                condition.get("status").and_then(Value::as_str).unwrap_or_default(),
            ),
            reason: condition
                .get("reason")
                .and_then(Value::as_str)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            message: condition
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        None => Readiness {
            status: ConditionStatus::Unknown,
            reason: None,
            message: "no Ready condition reported yet".to_string(),
        },
    }
}

/// Settings shared by every manifest of one catalog
#[derive(Debug, Clone)]
pub struct ManifestContext {
    pub namespace: String,
    pub catalog_name: String,
    pub owner: Option<OwnerReference>,
    pub interval: String,
    pub target_namespace: Option<String>,
    pub prune: bool,
}

impl ManifestContext {
    #[must_use]
    pub fn for_catalog(catalog: &Catalog, interval: Duration) -> Self {
        Self {
            namespace: catalog.metadata.namespace.clone().unwrap_or_default(),
            catalog_name: catalog.metadata.name.clone().unwrap_or_default(),
            owner: catalog.controller_owner_ref(&()),
            interval: format!("{}s", interval.as_secs()),
            target_namespace: catalog.spec.target_namespace.clone(),
            prune: catalog.spec.prune,
        }
    }

    fn labels(&self, group_key: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), CONTROLLER_NAME.to_string()),
            (CATALOG_NAME_LABEL.to_string(), self.catalog_name.clone()),
            (GROUP_KEY_LABEL.to_string(), group_key.to_string()),
        ])
    }
}

/// Desired spec of a managed child
#[must_use]
pub fn desired_spec(kind: ChildKind, group: &SourceGroup, ctx: &ManifestContext) -> Value {
    let key = group.key.as_str();
    let mut spec = match kind {
        ChildKind::GitRepository => json!({
            "interval": ctx.interval,
            "url": group.source.url,
            "ref": group.source.reference.to_git_ref(),
        }),
        ChildKind::ArtifactGenerator => {
            let path = group
                .source
                .path
                .as_deref()
                .map(|p| p.trim_matches('/'))
                .filter(|p| !p.is_empty() && *p != ".");
            let from = match path {
                Some(path) => format!("@{SOURCE_ALIAS}/{path}/**"),
                None => format!("@{SOURCE_ALIAS}/**"),
            };
            json!({
                "sources": [{
                    "alias": SOURCE_ALIAS,
                    "kind": ChildKind::GitRepository.as_str(),
                    "name": key,
                }],
                "artifacts": [{
                    "name": key,
                    "copy": [{ "from": from, "to": "@artifact/" }],
                }],
            })
        }
        ChildKind::Kustomization => json!({
            "interval": ctx.interval,
            "sourceRef": { "kind": ChildKind::ExternalArtifact.as_str(), "name": key },
            "path": "./",
            "prune": ctx.prune,
        }),
        ChildKind::HelmRelease => json!({
            "interval": ctx.interval,
            "chartRef": { "kind": ChildKind::ExternalArtifact.as_str(), "name": key },
        }),
        ChildKind::ExternalArtifact => Value::Null,
    };

    if matches!(kind, ChildKind::Kustomization | ChildKind::HelmRelease) {
        if let Some(target_namespace) = &ctx.target_namespace {
            spec["targetNamespace"] = json!(target_namespace);
        }
    }
    spec
}

/// Full desired object of a managed child
#[must_use]
pub fn desired_object(
    kind: ChildKind,
    group: &SourceGroup,
    ctx: &ManifestContext,
) -> DynamicObject {
    let mut object = DynamicObject::new(&group.key, &kind.api_resource())
        .within(&ctx.namespace)
        .data(json!({ "spec": desired_spec(kind, group, ctx) }));
    object.metadata.labels = Some(ctx.labels(&group.key));
    object.metadata.owner_references = ctx.owner.clone().map(|owner| vec![owner]);
    object
}

/// What a create-or-update did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    Created,
    Updated,
    Unchanged,
}

impl Write {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Write::Created => "create",
            Write::Updated => "update",
            Write::Unchanged => "unchanged",
        }
    }
}

/// Bring the stored child in line with `desired`
///
/// Only the spec, our labels and the owner reference are reconciled; fields
/// written by other parties are left alone.
fn merge_into(existing: &DynamicObject, desired: &DynamicObject) -> Option<DynamicObject> {
    let mut next = existing.clone();
    let mut changed = false;

    let desired_spec = desired.data.get("spec").cloned().unwrap_or(Value::Null);
    if next.data.get("spec") != Some(&desired_spec) {
        if !next.data.is_object() {
            next.data = json!({});
        }
        next.data["spec"] = desired_spec;
        changed = true;
    }

    let labels = next.metadata.labels.get_or_insert_with(BTreeMap::new);
    for (name, value) in desired.metadata.labels.iter().flatten() {
        if labels.get(name) != Some(value) {
            labels.insert(name.clone(), value.clone());
            changed = true;
        }
    }

    if let Some(owners) = &desired.metadata.owner_references {
        let current = next.metadata.owner_references.get_or_insert_with(Vec::new);
        for owner in owners {
            if !current.iter().any(|o| o.uid == owner.uid) {
                current.push(owner.clone());
                changed = true;
            }
        }
    }

    changed.then_some(next)
}

/// Create the child if missing, otherwise update it when it drifted
pub async fn upsert_child(
    store: &dyn ObjectStore,
    kind: ChildKind,
    desired: &DynamicObject,
    max_retries: u32,
) -> Result<(DynamicObject, Write), StoreError> {
    let resource = &kind.api_resource();
    let key = &ObjectKey {
        namespace: desired.metadata.namespace.clone(),
        name: desired.metadata.name.clone().unwrap_or_default(),
    };

    retry_on_conflict(max_retries, || async move {
        match store.get(resource, key).await? {
            None => match store.create(resource, desired).await {
                Ok(created) => Ok((created, Write::Created)),
                // Created concurrently; the retry sees it and compares
                Err(StoreError::AlreadyExists { kind, key }) => Err(StoreError::Conflict {
                    kind,
                    key,
                    message: "created concurrently".to_string(),
                }),
                Err(err) => Err(err),
            },
            Some(existing) => match merge_into(&existing, desired) {
                Some(next) => Ok((store.update(resource, &next).await?, Write::Updated)),
                None => Ok((existing, Write::Unchanged)),
            },
        }
    })
    .await
}
