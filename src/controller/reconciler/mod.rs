//! # Reconciler
//!
//! Glue between `kube_runtime::Controller` and the generic lifecycle state
//! machine. Each invocation re-reads the Catalog through the store, runs the
//! state machine under the configured deadline and maps the requeue hint to
//! an [`Action`].

mod types;

pub use types::{Reconciler, TriggerSource};

use crate::controller::lifecycle::{self, ReconcileError, RequeueHint};
use crate::crd::Catalog;
use crate::store::ObjectKey;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, Instrument};

/// Reconcile one Catalog
pub async fn reconcile(
    catalog: Arc<Catalog>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcileError> {
    let key = ObjectKey::from_resource(catalog.as_ref());
    let trigger = TriggerSource::for_catalog(&catalog);

    let config = ctx.config.read().await;
    let timeout = config.reconcile_timeout();
    let requeue_short = config.requeue_short_duration();
    drop(config);

    let span = info_span!(
        "controller.reconcile",
        resource.name = %key.name,
        resource.namespace = key.namespace.as_deref().unwrap_or(""),
        trigger_source = trigger.as_str(),
    );

    async move {
        debug!("watch.event.received");
        let started = Instant::now();
        let result = lifecycle::reconcile_with_timeout(
            ctx.store.as_ref(),
            &key,
            &ctx.orchestrator,
            &ctx.options,
            timeout,
        )
        .await;

        match result {
            Ok(hint) => {
                ctx.metrics.record_reconciliation("success", started.elapsed());
                ctx.reset_backoff(&key.to_string());
                let action = action_for(hint, requeue_short, &ctx);
                debug!(action = ?action, "watch.event.reconciled");
                Ok(action)
            }
            Err(err) => {
                let label = match err {
                    ReconcileError::Timeout { .. } => "timeout",
                    _ => "error",
                };
                ctx.metrics.record_reconciliation(label, started.elapsed());
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

fn action_for(hint: RequeueHint, requeue_short: Duration, ctx: &Reconciler) -> Action {
    match hint {
        RequeueHint::None => Action::await_change(),
        RequeueHint::Immediate => {
            ctx.metrics.record_requeue("immediate");
            Action::requeue(requeue_short)
        }
        RequeueHint::After(delay) => {
            ctx.metrics.record_requeue("scheduled");
            Action::requeue(delay)
        }
    }
}
