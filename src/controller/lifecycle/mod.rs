//! # Lifecycle
//!
//! Generic finalizer-driven reconcile state machine.
//!
//! ```text
//! NoFinalizer -> (finalizer added) -> Creating <-> Ready
//!        any of the above -> (deletion requested) -> Deleting -> (cleanup ensured) -> Gone
//! ```
//!
//! [`reconcile`] loads a resource, makes sure the finalizer is durably recorded
//! before any side effect runs, dispatches to an [`Orchestrator`], maps the
//! outcome to conditions and writes status back as a merge patch against the
//! state it loaded.

mod finalizer;

pub use finalizer::{add_finalizer, has_finalizer, remove_finalizer};

use crate::conditions::{self, reasons, set_conditions, Condition, ConditionStatus};
use crate::store::{
    create_merge_patch, get_typed, is_empty_patch, retry_on_conflict, ObjectKey, ObjectStore,
    StoreError,
};
use async_trait::async_trait;
use kube::api::ApiResource;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};

/// When the scheduler should run the next reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequeueHint {
    /// Wait for the next change
    #[default]
    None,
    /// Retry as soon as possible
    Immediate,
    /// Retry after at least this long
    After(Duration),
}

/// Result of an orchestrator step
#[derive(Debug)]
pub enum Outcome {
    Success,
    Pending,
    Failed(anyhow::Error),
}

impl Outcome {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct EnsureResult {
    pub requeue: RequeueHint,
    pub outcome: Outcome,
}

impl EnsureResult {
    #[must_use]
    pub fn success(requeue: RequeueHint) -> Self {
        Self {
            requeue,
            outcome: Outcome::Success,
        }
    }

    #[must_use]
    pub fn pending(requeue: RequeueHint) -> Self {
        Self {
            requeue,
            outcome: Outcome::Pending,
        }
    }

    #[must_use]
    pub fn failed(error: anyhow::Error) -> Self {
        Self {
            requeue: RequeueHint::None,
            outcome: Outcome::Failed(error),
        }
    }
}

/// A resource the state machine can drive
pub trait Reconcilable:
    kube::Resource<DynamicType = ()>
    + Clone
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// Business logic behind one resource kind
///
/// Both operations may mutate the in-memory resource (typically its status);
/// the state machine persists status changes afterwards.
#[async_trait]
pub trait Orchestrator<K: Reconcilable>: Send + Sync {
    async fn ensure_created(&self, resource: &mut K) -> EnsureResult;

    async fn ensure_deleted(&self, resource: &mut K) -> EnsureResult;

    /// Full condition set for the create path
    ///
    /// `None` derives a single Ready condition from the outcome.
    fn status(&self, _resource: &K, _outcome: &Outcome) -> Option<Vec<Condition>> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0:#}")]
    Business(anyhow::Error),
    #[error("reconcile of {key} did not finish within {timeout:?}")]
    Timeout { key: String, timeout: Duration },
}

/// Finalizer and retry settings for one resource kind
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub finalizer: String,
    pub max_conflict_retries: u32,
}

impl LifecycleOptions {
    pub fn new(finalizer: impl Into<String>) -> Self {
        Self {
            finalizer: finalizer.into(),
            max_conflict_retries: crate::constants::DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

/// Ready condition for a create-path outcome
#[must_use]
pub fn ready_condition(outcome: &Outcome) -> Condition {
    match outcome {
        Outcome::Success => Condition::new(
            conditions::READY,
            ConditionStatus::True,
            reasons::RECONCILED,
            "",
        ),
        Outcome::Pending => Condition::new(
            conditions::READY,
            ConditionStatus::False,
            reasons::PENDING_RECONCILIATION,
            "",
        ),
        Outcome::Failed(err) => Condition::new(
            conditions::READY,
            ConditionStatus::False,
            reasons::FAILING_RECONCILIATION,
            format!("{err:#}"),
        ),
    }
}

/// Delete condition for a delete-path outcome
#[must_use]
pub fn delete_condition(outcome: &Outcome) -> Condition {
    match outcome {
        Outcome::Success => Condition::new(
            conditions::DELETE,
            ConditionStatus::True,
            reasons::DELETED,
            "",
        ),
        Outcome::Pending => Condition::new(
            conditions::DELETE,
            ConditionStatus::False,
            reasons::PENDING_DELETION,
            "",
        ),
        Outcome::Failed(err) => Condition::new(
            conditions::DELETE,
            ConditionStatus::False,
            reasons::FAILING_DELETION,
            format!("{err:#}"),
        ),
    }
}

fn cleanup_finished(conditions: &[Condition]) -> bool {
    conditions::find_condition(conditions, conditions::DELETE)
        .is_some_and(|c| c.is_true() && c.reason == reasons::DELETED)
}

/// Drive one resource one step through its lifecycle
///
/// A resource that no longer exists is a success. Business failures are
/// returned as [`ReconcileError::Business`] after their condition has been
/// written, so the caller's backoff applies to them. A failed status write
/// is logged and never changes the returned error; after a successful
/// business step it turns an idle result into [`RequeueHint::Immediate`].
pub async fn reconcile<K: Reconcilable>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    orchestrator: &dyn Orchestrator<K>,
    options: &LifecycleOptions,
) -> Result<RequeueHint, ReconcileError> {
    let span = info_span!(
        "reconcile",
        resource.kind = %K::kind(&()),
        resource.name = %key.name,
        resource.namespace = key.namespace.as_deref().unwrap_or(""),
    );
    reconcile_inner(store, key, orchestrator, options)
        .instrument(span)
        .await
}

/// [`reconcile`] bounded by `timeout`
pub async fn reconcile_with_timeout<K: Reconcilable>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    orchestrator: &dyn Orchestrator<K>,
    options: &LifecycleOptions,
    timeout: Duration,
) -> Result<RequeueHint, ReconcileError> {
    tokio::time::timeout(timeout, reconcile(store, key, orchestrator, options))
        .await
        .map_err(|_elapsed| ReconcileError::Timeout {
            key: key.to_string(),
            timeout,
        })?
}

async fn reconcile_inner<K: Reconcilable>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    orchestrator: &dyn Orchestrator<K>,
    options: &LifecycleOptions,
) -> Result<RequeueHint, ReconcileError> {
    let Some(loaded) = get_typed::<K>(store, key).await? else {
        debug!("Resource not found, nothing to do");
        return Ok(RequeueHint::None);
    };
    let snapshot = loaded.clone();
    let mut working = loaded;
    let deleting = working.meta().deletion_timestamp.is_some();
    let owned = has_finalizer(&working, &options.finalizer);

    if !deleting && !owned {
        let present =
            add_finalizer::<K>(store, key, &options.finalizer, options.max_conflict_retries).await?;
        return Ok(if present {
            RequeueHint::Immediate
        } else {
            RequeueHint::None
        });
    }

    let (requeue, outcome) = if deleting {
        if !owned {
            debug!("Deletion pending on foreign finalizers");
            return Ok(RequeueHint::None);
        }
        if cleanup_finished(working.conditions()) {
            remove_finalizer::<K>(store, key, &options.finalizer, options.max_conflict_retries)
                .await?;
            return Ok(RequeueHint::None);
        }

        let EnsureResult { requeue, outcome } = orchestrator.ensure_deleted(&mut working).await;
        set_conditions(working.conditions_mut(), [delete_condition(&outcome)]);
        // A recorded Deleted condition is picked up by the next pass
        let requeue = match outcome {
            Outcome::Success => RequeueHint::Immediate,
            _ => requeue,
        };
        (requeue, outcome)
    } else {
        let EnsureResult { requeue, outcome } = orchestrator.ensure_created(&mut working).await;
        let new_conditions = orchestrator
            .status(&working, &outcome)
            .unwrap_or_else(|| vec![ready_condition(&outcome)]);
        set_conditions(working.conditions_mut(), new_conditions);
        (requeue, outcome)
    };

    let written = write_status(store, key, &snapshot, &working, options.max_conflict_retries).await;

    // Backoff follows the business outcome, never the status write
    let requeue = match written {
        Ok(()) => requeue,
        Err(write_err) => {
            warn!(error = %write_err, "Status write failed");
            match requeue {
                RequeueHint::None => RequeueHint::Immediate,
                other => other,
            }
        }
    };

    match outcome {
        Outcome::Failed(err) => Err(ReconcileError::Business(err)),
        _ => Ok(requeue),
    }
}

fn status_of<K: Serialize>(resource: &K) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(resource)?
        .get("status")
        .cloned()
        .unwrap_or(Value::Null))
}

/// Persist the status difference between `snapshot` and `working`
///
/// The patch is pinned to the resource version that was current when the
/// diff was taken; on conflict the version is refreshed and the same diff is
/// sent again. A resource that disappeared in the meantime is not an error.
async fn write_status<K: Reconcilable>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    snapshot: &K,
    working: &K,
    max_retries: u32,
) -> Result<(), StoreError> {
    let before = status_of(snapshot)?;
    let after = status_of(working)?;
    let diff = if before.is_null() {
        after
    } else {
        create_merge_patch(&before, &after)
    };
    if diff.is_null() || is_empty_patch(&diff) {
        debug!("Status unchanged, skipping write");
        return Ok(());
    }

    let resource = &ApiResource::erase::<K>(&());
    let diff = &diff;
    let first_version = &snapshot.meta().resource_version;
    let mut attempt = 0_u32;
    let result = retry_on_conflict(max_retries, || {
        attempt += 1;
        let refresh = attempt > 1;
        async move {
            let version = if refresh {
                match store.get(resource, key).await? {
                    Some(current) => current.metadata.resource_version,
                    None => return Ok(()),
                }
            } else {
                first_version.clone()
            };
            let patch = serde_json::json!({
                "metadata": { "resourceVersion": version },
                "status": diff,
            });
            store.patch_status(resource, key, &patch).await.map(|_| ())
        }
    })
    .await;

    match result {
        Err(err) if err.is_not_found() => {
            debug!("Resource deleted before status write");
            Ok(())
        }
        other => other,
    }
}
