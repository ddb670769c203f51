//! [`ObjectStore`] backed by the Kubernetes API server.

use super::{ObjectKey, ObjectStore, StoreError};
use crate::constants::CONTROLLER_NAME;
use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, DeleteParams, Patch, PatchParams, PostParams},
    core::DynamicObject,
    Client,
};
use tracing::debug;

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..PostParams::default()
        }
    }
}

/// Map client errors onto store errors by HTTP status
fn map_error(resource: &ApiResource, key: &ObjectKey, err: kube::Error) -> StoreError {
    let kind = resource.kind.clone();
    let key = key.to_string();
    match err {
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound { kind, key },
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            StoreError::AlreadyExists { kind, key }
        }
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict {
            kind,
            key,
            message: api_err.message.clone(),
        },
        other => StoreError::Api {
            kind,
            key,
            message: other.to_string(),
        },
    }
}

fn key_of(object: &DynamicObject) -> ObjectKey {
    ObjectKey {
        namespace: object.metadata.namespace.clone(),
        name: object.metadata.name.clone().unwrap_or_default(),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
    ) -> Result<Option<DynamicObject>, StoreError> {
        self.api(resource, key.namespace.as_deref())
            .get_opt(&key.name)
            .await
            .map_err(|e| map_error(resource, key, e))
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = key_of(object);
        let created = self
            .api(resource, key.namespace.as_deref())
            .create(&Self::post_params(), object)
            .await
            .map_err(|e| map_error(resource, &key, e))?;
        debug!(kind = %resource.kind, object = %key, "Created object");
        Ok(created)
    }

    async fn update(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = key_of(object);
        self.api(resource, key.namespace.as_deref())
            .replace(&key.name, &Self::post_params(), object)
            .await
            .map_err(|e| map_error(resource, &key, e))
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError> {
        self.api(resource, key.namespace.as_deref())
            .patch_status(
                &key.name,
                &PatchParams {
                    field_manager: Some(CONTROLLER_NAME.to_string()),
                    ..PatchParams::default()
                },
                &Patch::Merge(patch),
            )
            .await
            .map_err(|e| map_error(resource, key, e))
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<(), StoreError> {
        self.api(resource, key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await
            .map_err(|e| map_error(resource, key, e))?;
        debug!(kind = %resource.kind, object = %key, "Requested deletion");
        Ok(())
    }
}
