//! # Catalog Sources
//!
//! Git source declarations and the revision each one tracks.

use serde::{Deserialize, Serialize};

/// One git source declared by a Catalog
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSource {
    /// Repository locator
    /// Accepts `https://host/owner/repo`, `ssh://git@host/owner/repo` and `git@host:owner/repo`
    /// with an optional `.git` suffix
    pub url: String,
    /// Revision to track. Defaults to the `main` branch.
    #[serde(default, rename = "ref")]
    pub reference: SourceReference,
    /// Path inside the repository to apply. Defaults to the repository root.
    #[serde(default)]
    pub path: Option<String>,
    /// Kind of object that applies the artifact
    #[serde(default)]
    pub target: ApplyTarget,
}

/// Git revision selector
///
/// When several fields are set the most specific wins: commit, semver, tag, branch.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl SourceReference {
    /// The effective revision string used in the group key
    #[must_use]
    pub fn revision(&self) -> &str {
        [&self.commit, &self.semver, &self.tag, &self.branch]
            .into_iter()
            .find_map(|value| value.as_deref().filter(|v| !v.trim().is_empty()))
            .unwrap_or(crate::constants::DEFAULT_SOURCE_BRANCH)
    }

    /// The reference block written into a GitRepository spec
    #[must_use]
    pub fn to_git_ref(&self) -> serde_json::Value {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
        };
        if let Some(commit) = non_empty(&self.commit) {
            return serde_json::json!({ "commit": commit });
        }
        if let Some(semver) = non_empty(&self.semver) {
            return serde_json::json!({ "semver": semver });
        }
        if let Some(tag) = non_empty(&self.tag) {
            return serde_json::json!({ "tag": tag });
        }
        serde_json::json!({ "branch": self.revision() })
    }
}

/// Object kind that applies a group's artifact to the cluster
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, schemars::JsonSchema,
)]
pub enum ApplyTarget {
    #[default]
    Kustomization,
    HelmRelease,
}
