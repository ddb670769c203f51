//! Finalizer bookkeeping on the persisted resource.

use super::Reconcilable;
use crate::store::{get_typed, retry_on_conflict, update_typed, ObjectKey, ObjectStore, StoreError};
use tracing::{debug, info};

#[must_use]
pub fn has_finalizer<K: kube::Resource>(resource: &K, finalizer: &str) -> bool {
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
}

/// Add `finalizer` to the stored resource
///
/// Re-reads on every attempt so a concurrent writer only costs a retry.
/// Returns `false` when the resource no longer exists.
pub async fn add_finalizer<K: Reconcilable>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    finalizer: &str,
    max_retries: u32,
) -> Result<bool, StoreError> {
    retry_on_conflict(max_retries, || async move {
        let Some(mut current) = get_typed::<K>(store, key).await? else {
            return Ok(false);
        };
        if has_finalizer(&current, finalizer) {
            return Ok(true);
        }
        current
            .meta_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        update_typed(store, &current).await?;
        info!(resource = %key, finalizer, "Added finalizer");
        Ok(true)
    })
    .await
}

/// Remove `finalizer` from the stored resource, letting the store delete it
pub async fn remove_finalizer<K: Reconcilable>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    finalizer: &str,
    max_retries: u32,
) -> Result<(), StoreError> {
    retry_on_conflict(max_retries, || async move {
        let Some(mut current) = get_typed::<K>(store, key).await? else {
            return Ok(());
        };
        if !has_finalizer(&current, finalizer) {
            return Ok(());
        }
        if let Some(finalizers) = current.meta_mut().finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
        match update_typed(store, &current).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                debug!(resource = %key, "Resource vanished while releasing finalizer");
            }
            Err(err) => return Err(err),
        }
        info!(resource = %key, finalizer, "Removed finalizer");
        Ok(())
    })
    .await
}
