//! # Prelude
//!
//! Commonly used types, importable with `use catalog_controller::prelude::*;`.

pub use crate::crd::*;

pub use crate::conditions::{
    find_condition, is_condition_true, remove_condition, set_conditions, Condition,
    ConditionStatus,
};

pub use crate::controller::catalog::{CatalogOrchestrator, CatalogSettings, ChildKind};
pub use crate::controller::lifecycle::{
    reconcile, reconcile_with_timeout, EnsureResult, LifecycleOptions, Orchestrator, Outcome,
    Reconcilable, ReconcileError, RequeueHint,
};
pub use crate::controller::reconciler::{Reconciler, TriggerSource};
pub use crate::controller::routine::{execute_reconcile_routine, Routine, RoutineResult};

pub use crate::config::{ControllerConfig, ServerConfig, SharedControllerConfig, SharedServerConfig};

pub use crate::observability::Metrics;
pub use crate::store::{KubeStore, MemoryStore, ObjectKey, ObjectStore, StoreError};
