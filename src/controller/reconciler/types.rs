//! # Reconciler Types
//!
//! Shared context handed to every reconcile invocation by the controller runtime.

use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::constants::CATALOG_FINALIZER;
use crate::controller::backoff::BackoffState;
use crate::controller::catalog::{CatalogOrchestrator, CatalogSettings};
use crate::controller::lifecycle::LifecycleOptions;
use crate::crd::Catalog;
use crate::observability::Metrics;
use crate::store::ObjectStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Why a reconcile was triggered
///
/// Informational only; every trigger runs the same state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// First time this generation of the spec is seen
    SpecChange,
    /// Requeue or owned-child event with an already observed generation
    Periodic,
    /// Catalog carries a deletion timestamp
    Deletion,
}

impl TriggerSource {
    #[must_use]
    pub fn for_catalog(catalog: &Catalog) -> Self {
        if catalog.metadata.deletion_timestamp.is_some() {
            return Self::Deletion;
        }
        let observed = catalog.status.as_ref().and_then(|s| s.observed_generation);
        if observed.is_some() && observed == catalog.metadata.generation {
            Self::Periodic
        } else {
            Self::SpecChange
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpecChange => "spec-change",
            Self::Periodic => "periodic",
            Self::Deletion => "deletion",
        }
    }
}

/// Controller context
pub struct Reconciler {
    pub store: Arc<dyn ObjectStore>,
    pub orchestrator: CatalogOrchestrator,
    pub metrics: Arc<Metrics>,
    pub options: LifecycleOptions,
    pub config: SharedControllerConfig,
    /// Fibonacci backoff per `namespace/name`, advanced by the error policy
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Build the context from the configuration in effect at startup
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metrics: Arc<Metrics>,
        config: SharedControllerConfig,
        current: &ControllerConfig,
    ) -> Self {
        let settings = CatalogSettings {
            not_ready_retry: current.not_ready_retry_duration(),
            max_conflict_retries: current.max_conflict_retries,
        };
        let orchestrator =
            CatalogOrchestrator::new(Arc::clone(&store), Arc::clone(&metrics), settings);
        let mut options = LifecycleOptions::new(CATALOG_FINALIZER);
        options.max_conflict_retries = current.max_conflict_retries;

        Self {
            store,
            orchestrator,
            metrics,
            options,
            config,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Advance the backoff of `key` and return the delay before its next attempt
    pub fn next_error_backoff(
        &self,
        key: &str,
        min_minutes: u64,
        max_minutes: u64,
    ) -> (Duration, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(key.to_string())
            .or_insert_with(|| BackoffState::new(min_minutes, max_minutes));
        let delay = state.increment_error();
        (delay, state.error_count)
    }

    /// Forget the failure history of `key`
    pub fn reset_backoff(&self, key: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        states.remove(key);
    }
}
