//! In-memory [`ObjectStore`] used by tests and local dry runs.
//!
//! Emulates the API server behaviour the controller depends on:
//! resource versions with optimistic concurrency, generation bumps on spec
//! changes, the status subresource, and finalizer-blocked deletion.

use super::{ObjectKey, ObjectStore, StoreError};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::{
    api::ApiResource,
    core::{DynamicObject, TypeMeta},
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Store operation, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    Create,
    Update,
    PatchStatus,
    Delete,
}

/// (group, kind, namespace, name)
type Slot = (String, String, Option<String>, String);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Slot, DynamicObject>,
    resource_version: u64,
    writes: u64,
    failures: HashMap<(String, StoreOperation), String>,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn check_failure(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        operation: StoreOperation,
    ) -> Result<(), StoreError> {
        match self.failures.get(&(resource.kind.clone(), operation)) {
            Some(message) => Err(StoreError::Api {
                kind: resource.kind.clone(),
                key: key.to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn slot(resource: &ApiResource, key: &ObjectKey) -> Slot {
    (
        resource.group.clone(),
        resource.kind.clone(),
        key.namespace.clone(),
        key.name.clone(),
    )
}

fn key_of(object: &DynamicObject) -> ObjectKey {
    ObjectKey {
        namespace: object.metadata.namespace.clone(),
        name: object.metadata.name.clone().unwrap_or_default(),
    }
}

fn not_found(resource: &ApiResource, key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        kind: resource.kind.clone(),
        key: key.to_string(),
    }
}

fn conflict(resource: &ApiResource, key: &ObjectKey, sent: &str, stored: &str) -> StoreError {
    StoreError::Conflict {
        kind: resource.kind.clone(),
        key: key.to_string(),
        message: format!("resourceVersion {sent} is stale, current is {stored}"),
    }
}

/// Everything except status
fn spec_of(object: &DynamicObject) -> Value {
    let mut data = object.data.clone();
    if let Value::Object(map) = &mut data {
        map.remove("status");
    }
    data
}

fn ensure_object(data: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !data.is_object() {
        *data = Value::Object(serde_json::Map::new());
    }
    match data {
        Value::Object(map) => map,
        _ => unreachable!("data was just replaced with an object"),
    }
}

fn has_finalizers(object: &DynamicObject) -> bool {
    object
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| !finalizers.is_empty())
}

/// Set `metadata.deletionTimestamp` to now
fn mark_for_deletion(object: &DynamicObject) -> Result<DynamicObject, StoreError> {
    let mut value = serde_json::to_value(object)?;
    value["metadata"]["deletionTimestamp"] =
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    Ok(serde_json::from_value(value)?)
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every `operation` on `kind` fail with an API error until cleared
    pub fn fail(&self, kind: &str, operation: StoreOperation, message: &str) {
        self.lock()
            .failures
            .insert((kind.to_string(), operation), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Number of successful writes made through the [`ObjectStore`] interface
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Objects of one kind, ordered by namespace and name
    #[must_use]
    pub fn list(&self, resource: &ApiResource) -> Vec<DynamicObject> {
        self.lock()
            .objects
            .iter()
            .filter(|((group, kind, _, _), _)| *group == resource.group && *kind == resource.kind)
            .map(|(_, object)| object.clone())
            .collect()
    }

    /// Replace the status of a stored object as another controller would
    ///
    /// Not counted as a write.
    pub fn set_status(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        status: Value,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let resource_version = state.next_resource_version();
        let object = state
            .objects
            .get_mut(&slot(resource, key))
            .ok_or_else(|| not_found(resource, key))?;
        ensure_object(&mut object.data).insert("status".to_string(), status);
        object.metadata.resource_version = Some(resource_version);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
    ) -> Result<Option<DynamicObject>, StoreError> {
        let state = self.lock();
        state.check_failure(resource, key, StoreOperation::Get)?;
        Ok(state.objects.get(&slot(resource, key)).cloned())
    }

    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = key_of(object);
        let mut state = self.lock();
        state.check_failure(resource, &key, StoreOperation::Create)?;
        let slot = slot(resource, &key);
        if state.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists {
                kind: resource.kind.clone(),
                key: key.to_string(),
            });
        }

        let mut stored = object.clone();
        stored.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.metadata.generation = Some(1);
        stored.metadata.deletion_timestamp = None;
        stored.metadata.resource_version = Some(state.next_resource_version());
        ensure_object(&mut stored.data);

        state.objects.insert(slot, stored.clone());
        state.writes += 1;
        Ok(stored)
    }

    async fn update(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = key_of(object);
        let mut state = self.lock();
        state.check_failure(resource, &key, StoreOperation::Update)?;
        let slot = slot(resource, &key);
        let stored = state
            .objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| not_found(resource, &key))?;

        let stored_version = stored.metadata.resource_version.clone().unwrap_or_default();
        if let Some(sent) = &object.metadata.resource_version {
            if *sent != stored_version {
                return Err(conflict(resource, &key, sent, &stored_version));
            }
        }

        let mut next = object.clone();
        let data = ensure_object(&mut next.data);
        data.remove("status");
        if let Some(status) = stored.data.get("status") {
            data.insert("status".to_string(), status.clone());
        }

        let generation = stored.metadata.generation.unwrap_or(1);
        next.metadata.generation = Some(if spec_of(&next) == spec_of(&stored) {
            generation
        } else {
            generation + 1
        });
        next.types.clone_from(&stored.types);
        next.metadata.uid.clone_from(&stored.metadata.uid);
        next.metadata
            .deletion_timestamp
            .clone_from(&stored.metadata.deletion_timestamp);
        next.metadata.resource_version = Some(state.next_resource_version());
        state.writes += 1;

        if next.metadata.deletion_timestamp.is_some() && !has_finalizers(&next) {
            state.objects.remove(&slot);
        } else {
            state.objects.insert(slot, next.clone());
        }
        Ok(next)
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError> {
        let mut state = self.lock();
        state.check_failure(resource, key, StoreOperation::PatchStatus)?;
        let slot = slot(resource, key);
        let mut stored = state
            .objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| not_found(resource, key))?;

        let stored_version = stored.metadata.resource_version.clone().unwrap_or_default();
        if let Some(sent) = patch
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
        {
            if sent != stored_version {
                return Err(conflict(resource, key, sent, &stored_version));
            }
        }

        if let Some(status_patch) = patch.get("status") {
            let data = ensure_object(&mut stored.data);
            let mut status = data.remove("status").unwrap_or(Value::Null);
            json_patch::merge(&mut status, status_patch);
            if !status.is_null() {
                data.insert("status".to_string(), status);
            }
        }

        stored.metadata.resource_version = Some(state.next_resource_version());
        state.objects.insert(slot, stored.clone());
        state.writes += 1;
        Ok(stored)
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_failure(resource, key, StoreOperation::Delete)?;
        let slot = slot(resource, key);
        let stored = state
            .objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| not_found(resource, key))?;

        if has_finalizers(&stored) {
            if stored.metadata.deletion_timestamp.is_none() {
                let mut marked = mark_for_deletion(&stored)?;
                marked.metadata.resource_version = Some(state.next_resource_version());
                state.objects.insert(slot, marked);
            }
        } else {
            state.objects.remove(&slot);
        }
        state.writes += 1;
        Ok(())
    }
}
