//! # Catalog Spec
//!
//! Main CRD specification types and default values.

use crate::conditions::Condition;
use crate::controller::lifecycle::Reconcilable;
use serde::{Deserialize, Serialize};

/// Catalog Custom Resource Definition
///
/// A Catalog declares a set of git sources. Sources that resolve to the same
/// repository and revision share one mirror; each group is then materialised
/// as a chain of FluxCD objects that ends with a Kustomization or HelmRelease.
///
/// # Example
///
/// ```yaml
/// apiVersion: catalog.octopilot.io/v1alpha1
/// kind: Catalog
/// metadata:
///   name: platform
///   namespace: flux-system
/// spec:
///   interval: 10m
///   sources:
///     - url: https://github.com/acme/widgets
///       ref:
///         tag: v1.2.0
///       path: deploy/overlays/prod
///     - url: git@github.com:acme/widgets.git
///       ref:
///         tag: v1.2.0
///       path: charts/widgets
///       target: HelmRelease
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Catalog",
    group = "catalog.octopilot.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::CatalogStatus",
    shortname = "cat",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSpec {
    /// Git sources to mirror and apply
    #[serde(default)]
    pub sources: Vec<crate::crd::CatalogSource>,
    /// Reconcile interval, also used as the interval of every generated FluxCD object
    /// Format: Kubernetes duration string (e.g., "1m", "10m", "1h")
    /// Minimum: 1m
    /// Default: "10m"
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Namespace the apply objects deploy into. Defaults to the Catalog namespace.
    #[serde(default)]
    pub target_namespace: Option<String>,
    /// Garbage collect objects removed from the rendered output
    /// Default: true
    #[serde(default = "default_true")]
    pub prune: bool,
}

/// Default value for the reconcile interval
pub fn default_interval() -> String {
    crate::constants::DEFAULT_CATALOG_INTERVAL.to_string()
}

/// Default value for boolean true
pub fn default_true() -> bool {
    true
}

impl Reconcilable for Catalog {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map_or(&[], |status| status.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}
