//! Shared fixtures for the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use catalog_controller::constants::CATALOG_FINALIZER;
use catalog_controller::controller::catalog::{CatalogOrchestrator, CatalogSettings, ChildKind};
use catalog_controller::controller::grouping::resolve_groups;
use catalog_controller::controller::lifecycle::{
    reconcile, LifecycleOptions, ReconcileError, RequeueHint,
};
use catalog_controller::crd::{ApplyTarget, Catalog, CatalogSource, CatalogSpec, SourceReference};
use catalog_controller::observability::Metrics;
use catalog_controller::store::{
    get_typed, to_dynamic, MemoryStore, ObjectKey, ObjectStore,
};
use kube::api::ApiResource;
use kube::core::DynamicObject;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "flux-system";

pub fn source(url: &str, tag: &str) -> CatalogSource {
    CatalogSource {
        url: url.to_string(),
        reference: SourceReference {
            tag: Some(tag.to_string()),
            ..SourceReference::default()
        },
        path: None,
        target: ApplyTarget::Kustomization,
    }
}

pub fn catalog(name: &str, sources: Vec<CatalogSource>) -> Catalog {
    let mut catalog = Catalog::new(
        name,
        CatalogSpec {
            sources,
            interval: "10m".to_string(),
            target_namespace: None,
            prune: true,
        },
    );
    catalog.metadata.namespace = Some(NAMESPACE.to_string());
    catalog
}

pub fn ready_status(message: &str) -> Value {
    json!({
        "conditions": [{
            "type": "Ready",
            "status": "True",
            "reason": "Succeeded",
            "message": message,
        }]
    })
}

pub fn failed_status(reason: &str, message: &str) -> Value {
    json!({
        "conditions": [{
            "type": "Ready",
            "status": "False",
            "reason": reason,
            "message": message,
        }]
    })
}

pub fn catalog_resource() -> ApiResource {
    ApiResource::erase::<Catalog>(&())
}

/// Catalog orchestrator wired to an in-memory store
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<Metrics>,
    pub orchestrator: CatalogOrchestrator,
    pub options: LifecycleOptions,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let settings = CatalogSettings {
            not_ready_retry: Duration::from_secs(30),
            max_conflict_retries: 5,
        };
        let orchestrator = CatalogOrchestrator::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&metrics),
            settings,
        );
        Self {
            store,
            metrics,
            orchestrator,
            options: LifecycleOptions::new(CATALOG_FINALIZER),
        }
    }

    pub async fn apply(&self, catalog: &Catalog) {
        self.store
            .create(&catalog_resource(), &to_dynamic(catalog).unwrap())
            .await
            .unwrap();
    }

    pub async fn reconcile(&self, name: &str) -> Result<RequeueHint, ReconcileError> {
        reconcile(
            self.store.as_ref(),
            &ObjectKey::new(NAMESPACE, name),
            &self.orchestrator,
            &self.options,
        )
        .await
    }

    pub async fn catalog(&self, name: &str) -> Option<Catalog> {
        get_typed::<Catalog>(self.store.as_ref(), &ObjectKey::new(NAMESPACE, name))
            .await
            .unwrap()
    }

    pub async fn child(&self, kind: ChildKind, name: &str) -> Option<DynamicObject> {
        self.store
            .get(&kind.api_resource(), &ObjectKey::new(NAMESPACE, name))
            .await
            .unwrap()
    }

    pub fn set_child_status(&self, kind: ChildKind, name: &str, status: Value) {
        self.store
            .set_status(&kind.api_resource(), &ObjectKey::new(NAMESPACE, name), status)
            .unwrap();
    }

    /// Stand in for the generator publishing its artifact
    pub async fn publish_artifact(&self, name: &str) {
        let resource = ChildKind::ExternalArtifact.api_resource();
        let artifact = DynamicObject::new(name, &resource)
            .within(NAMESPACE)
            .data(json!({ "spec": {} }));
        self.store.create(&resource, &artifact).await.unwrap();
        self.set_child_status(ChildKind::ExternalArtifact, name, ready_status("artifact stored"));
    }

    /// Drive a catalog's single group through the whole chain
    pub async fn converge(&self, name: &str, key: &str, apply_kind: ChildKind) {
        assert_eq!(self.reconcile(name).await.unwrap(), RequeueHint::Immediate);

        assert_eq!(self.reconcile(name).await.unwrap(), RequeueHint::Immediate);
        self.set_child_status(ChildKind::GitRepository, key, ready_status("stored revision"));

        assert_eq!(self.reconcile(name).await.unwrap(), RequeueHint::Immediate);
        self.set_child_status(ChildKind::ArtifactGenerator, key, ready_status("generated"));

        assert_eq!(self.reconcile(name).await.unwrap(), RequeueHint::Immediate);
        self.publish_artifact(key).await;

        assert_eq!(self.reconcile(name).await.unwrap(), RequeueHint::Immediate);
        self.set_child_status(apply_kind, key, ready_status("applied"));

        assert_eq!(
            self.reconcile(name).await.unwrap(),
            RequeueHint::After(Duration::from_secs(600))
        );
    }
}

/// Group keys in source order
pub fn keys(owner: &str, sources: &[CatalogSource]) -> Vec<String> {
    resolve_groups(owner, sources)
        .unwrap()
        .into_iter()
        .map(|group| group.key)
        .collect()
}
