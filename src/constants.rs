//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Field manager / controller name used for writes and the managed-by label
pub const CONTROLLER_NAME: &str = "catalog-controller";

/// API group of the Catalog CRD
pub const CATALOG_GROUP: &str = "catalog.octopilot.io";

/// Finalizer that blocks physical deletion until cleanup of owned children completes
pub const CATALOG_FINALIZER: &str = "catalog.octopilot.io/finalizer";

/// Annotation that suspends a Catalog when set to "true"
pub const SUSPEND_ANNOTATION: &str = "catalog.octopilot.io/suspend";

/// Label carrying the owning Catalog name on every managed child
pub const CATALOG_NAME_LABEL: &str = "catalog.octopilot.io/name";

/// Label carrying the group key on every managed child
pub const GROUP_KEY_LABEL: &str = "catalog.octopilot.io/group";

/// Standard managed-by label
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Fibonacci backoff bounds for reconciliation errors (minutes)
pub const DEFAULT_BACKOFF_MIN_MINUTES: u64 = 1;
pub const DEFAULT_BACKOFF_MAX_MINUTES: u64 = 10;

/// Default exponential backoff for watch stream restarts (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1000;
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Delay used for an "immediate" requeue (freshly created child has no status yet)
pub const DEFAULT_REQUEUE_SHORT_SECS: u64 = 5;

/// Delay before re-checking a chain that has a member reporting not-ready
pub const DEFAULT_NOT_READY_RETRY_SECS: u64 = 30;

/// Upper bound for a single reconcile invocation
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 120;

/// Bounded re-read-and-retry count for optimistic-concurrency conflicts
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Default Catalog reconcile interval
pub const DEFAULT_CATALOG_INTERVAL: &str = "10m";

/// Minimum Catalog reconcile interval (seconds)
pub const MIN_CATALOG_INTERVAL_SECS: u64 = 60;

/// Default git branch when a source declares no reference
pub const DEFAULT_SOURCE_BRANCH: &str = "main";
