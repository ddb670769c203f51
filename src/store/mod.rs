//! # Object Store
//!
//! Abstraction over the cluster's declarative object API.
//!
//! Every read and write made by the lifecycle engine and the orchestrators
//! goes through [`ObjectStore`]. [`KubeStore`] talks to the API server;
//! [`MemoryStore`] emulates the semantics the controller relies on
//! (resource versions, finalizer-blocked deletion, status merge patches) so
//! whole reconciliations can run in tests.

mod cluster;
mod memory;
mod patch;

pub use cluster::KubeStore;
pub use memory::{MemoryStore, StoreOperation};
pub use patch::create_merge_patch;
pub(crate) use patch::is_empty_patch;

use async_trait::async_trait;
use kube::api::ApiResource;
use kube::core::DynamicObject;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::future::Future;
use tracing::debug;

/// Namespaced (or cluster-scoped) object name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an existing object, from its metadata
    pub fn from_resource<K: kube::Resource>(resource: &K) -> Self {
        let meta = resource.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },
    #[error("conflict writing {kind} {key}: {message}")]
    Conflict {
        kind: String,
        key: String,
        message: String,
    },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },
    #[error("failed to convert object: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("API request for {kind} {key} failed: {message}")]
    Api {
        kind: String,
        key: String,
        message: String,
    },
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Declarative object API used by the controller
///
/// Writes are optimistic: `update` fails with [`StoreError::Conflict`] when
/// the object's `resourceVersion` is stale, and so does `patch_status` when
/// the patch pins `metadata.resourceVersion`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object; `None` when it does not exist
    async fn get(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
    ) -> Result<Option<DynamicObject>, StoreError>;

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Replace metadata and spec of an existing object
    async fn update(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Apply an RFC 7396 merge patch to the status subresource
    async fn patch_status(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError>;

    /// Request deletion. Objects holding finalizers are only marked for deletion.
    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<(), StoreError>;
}

/// Convert a typed resource into a dynamic object
pub fn to_dynamic<K: Serialize>(resource: &K) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(resource)?)?)
}

/// Convert a dynamic object back into its typed form
pub fn from_dynamic<K: DeserializeOwned>(object: DynamicObject) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Read a typed resource
pub async fn get_typed<K>(store: &dyn ObjectStore, key: &ObjectKey) -> Result<Option<K>, StoreError>
where
    K: kube::Resource<DynamicType = ()> + DeserializeOwned,
{
    let resource = ApiResource::erase::<K>(&());
    store
        .get(&resource, key)
        .await?
        .map(from_dynamic)
        .transpose()
}

/// Update a typed resource, returning the stored version
pub async fn update_typed<K>(store: &dyn ObjectStore, object: &K) -> Result<K, StoreError>
where
    K: kube::Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let resource = ApiResource::erase::<K>(&());
    let updated = store.update(&resource, &to_dynamic(object)?).await?;
    from_dynamic(updated)
}

/// Run `operation` until it succeeds, fails with a non-conflict error, or
/// `max_retries` conflicts have been absorbed
///
/// The closure must re-read whatever it writes so each attempt starts from the
/// latest resource version.
pub async fn retry_on_conflict<T, F, Fut>(
    max_retries: u32,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Err(err) if err.is_conflict() && attempt < max_retries => {
                attempt += 1;
                debug!(attempt, max_retries, error = %err, "Retrying after write conflict");
            }
            result => return result,
        }
    }
}
