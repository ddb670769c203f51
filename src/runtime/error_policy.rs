//! # Error Policy
//!
//! Requeue decisions for failed reconciles and classification of watch
//! stream errors.

use crate::constants::{DEFAULT_BACKOFF_MAX_MINUTES, DEFAULT_BACKOFF_MIN_MINUTES};
use crate::controller::lifecycle::ReconcileError;
use crate::controller::reconciler::Reconciler;
use crate::crd::Catalog;
use crate::store::ObjectKey;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Requeue a failed Catalog with its own Fibonacci backoff
pub fn handle_reconciliation_error(
    catalog: Arc<Catalog>,
    error: &ReconcileError,
    ctx: Arc<Reconciler>,
) -> Action {
    let key = ObjectKey::from_resource(catalog.as_ref()).to_string();
    let _span = tracing::error_span!("controller.reconciliation_error", resource = %key).entered();

    error!(error = %error, "Reconciliation failed");

    // The error policy runs synchronously; fall back to defaults while a reload holds the lock
    let (min_minutes, max_minutes) = ctx.config.try_read().map_or(
        (DEFAULT_BACKOFF_MIN_MINUTES, DEFAULT_BACKOFF_MAX_MINUTES),
        |config| (config.backoff_min_minutes, config.backoff_max_minutes),
    );
    let (delay, error_count) = ctx.next_error_backoff(&key, min_minutes, max_minutes);

    info!(
        delay_secs = delay.as_secs(),
        error_count,
        "Retrying with Fibonacci backoff"
    );
    ctx.metrics.record_requeue("error-backoff");
    Action::requeue(delay)
}

/// How the watch loop reacts to a stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

impl WatchErrorKind {
    /// Classify by the rendered error chain
    ///
    /// 404 is checked before 401: a plain-text 404 body surfaces as a
    /// deserialization error whose chain mentions the watch as well.
    #[must_use]
    pub fn classify(error: &str) -> Self {
        let not_found = error.contains("ObjectNotFound")
            || error.contains("404")
            || error.contains("not found");
        if (error.contains("401") || error.contains("Unauthorized")) && !not_found {
            Self::Unauthorized
        } else if error.contains("410")
            || error.contains("too old resource version")
            || error.contains("Expired")
            || error.contains("Gone")
        {
            Self::Expired
        } else if error.contains("429")
            || error.contains("TooManyRequests")
            || error.contains("storage is (re)initializing")
        {
            Self::Throttled
        } else if not_found {
            Self::NotFound
        } else {
            Self::Other
        }
    }
}

/// Handle a watch stream error
///
/// Returns `true` when the stream should keep the event, `false` to drop it.
/// Throttling doubles `backoff_ms` up to `max_backoff_ms`.
pub async fn handle_watch_stream_error(
    error: &str,
    backoff_ms: &AtomicU64,
    max_backoff_ms: u64,
    restart_delay: Duration,
) -> bool {
    let kind = WatchErrorKind::classify(error);
    let span = tracing::warn_span!("controller.watch.error", error_kind = ?kind);

    async move {
        match kind {
            WatchErrorKind::Unauthorized => {
                error!(
                    error = %error,
                    "Watch authentication failed (401), RBAC may have been revoked"
                );
                warn!(
                    "Waiting {}s before retrying watch",
                    restart_delay.as_secs()
                );
                tokio::time::sleep(restart_delay).await;
                false
            }
            WatchErrorKind::Expired => {
                warn!("Watch resource version expired (410), watch will restart");
                false
            }
            WatchErrorKind::Throttled => {
                let current = backoff_ms.load(Ordering::Relaxed);
                warn!("API server throttling (429), backing off for {}ms", current);
                tokio::time::sleep(Duration::from_millis(current)).await;
                backoff_ms.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
                false
            }
            WatchErrorKind::NotFound => {
                warn!(error = %error, "Watched object not found (404), the CRD may be missing");
                true
            }
            WatchErrorKind::Other => {
                error!(error = %error, "Controller stream error");
                tokio::time::sleep(restart_delay).await;
                false
            }
        }
    }
    .instrument(span)
    .await
}
