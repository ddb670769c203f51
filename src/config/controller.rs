//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_or_default, env_var_or_default_str};
use crate::constants::{
    DEFAULT_BACKOFF_MAX_MINUTES, DEFAULT_BACKOFF_MIN_MINUTES, DEFAULT_MAX_CONFLICT_RETRIES,
    DEFAULT_NOT_READY_RETRY_SECS, DEFAULT_RECONCILE_TIMEOUT_SECS,
    DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, DEFAULT_REQUEUE_SHORT_SECS,
    DEFAULT_WATCH_BACKOFF_MAX_MS, DEFAULT_WATCH_BACKOFF_START_MS,
    DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Fallback requeue (seconds) when the backoff state cannot be read
    pub reconciliation_error_requeue_secs: u64,
    /// Fibonacci backoff lower bound for failing resources (minutes)
    pub backoff_min_minutes: u64,
    /// Fibonacci backoff upper bound for failing resources (minutes)
    pub backoff_max_minutes: u64,
    /// Watch stream restart backoff start (milliseconds)
    pub watch_backoff_start_ms: u64,
    /// Watch stream restart backoff cap (milliseconds)
    pub watch_backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after the stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Delay for "requeue as soon as possible" hints (seconds)
    pub requeue_short_secs: u64,
    /// Delay before re-checking a chain with a not-ready member (seconds)
    pub not_ready_retry_secs: u64,
    /// Deadline for a single reconcile invocation (seconds)
    pub reconcile_timeout_secs: u64,
    /// Bounded retry count for optimistic-concurrency conflicts
    pub max_conflict_retries: u32,
    /// Log format (json, text)
    pub log_format: String,
    /// Namespace to watch; empty watches all namespaces
    pub watch_namespace: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            backoff_min_minutes: DEFAULT_BACKOFF_MIN_MINUTES,
            backoff_max_minutes: DEFAULT_BACKOFF_MAX_MINUTES,
            watch_backoff_start_ms: DEFAULT_WATCH_BACKOFF_START_MS,
            watch_backoff_max_ms: DEFAULT_WATCH_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            requeue_short_secs: DEFAULT_REQUEUE_SHORT_SECS,
            not_ready_retry_secs: DEFAULT_NOT_READY_RETRY_SECS,
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            log_format: "json".to_string(),
            watch_namespace: String::new(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            reconciliation_error_requeue_secs: env_var_or_default(
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            ),
            backoff_min_minutes: env_var_or_default(
                "BACKOFF_MIN_MINUTES",
                DEFAULT_BACKOFF_MIN_MINUTES,
            ),
            backoff_max_minutes: env_var_or_default(
                "BACKOFF_MAX_MINUTES",
                DEFAULT_BACKOFF_MAX_MINUTES,
            ),
            watch_backoff_start_ms: env_var_or_default(
                "WATCH_BACKOFF_START_MS",
                DEFAULT_WATCH_BACKOFF_START_MS,
            ),
            watch_backoff_max_ms: env_var_or_default(
                "WATCH_BACKOFF_MAX_MS",
                DEFAULT_WATCH_BACKOFF_MAX_MS,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            requeue_short_secs: env_var_or_default(
                "REQUEUE_SHORT_SECS",
                DEFAULT_REQUEUE_SHORT_SECS,
            ),
            not_ready_retry_secs: env_var_or_default(
                "NOT_READY_RETRY_SECS",
                DEFAULT_NOT_READY_RETRY_SECS,
            ),
            reconcile_timeout_secs: env_var_or_default(
                "RECONCILE_TIMEOUT_SECS",
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            ),
            max_conflict_retries: env_var_or_default(
                "MAX_CONFLICT_RETRIES",
                DEFAULT_MAX_CONFLICT_RETRIES,
            ),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
            watch_namespace: env_var_or_default_str("WATCH_NAMESPACE", ""),
        }
    }

    /// Get fallback reconciliation error requeue duration
    #[must_use]
    pub fn reconciliation_error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.reconciliation_error_requeue_secs)
    }

    /// Get the short requeue duration
    #[must_use]
    pub fn requeue_short_duration(&self) -> Duration {
        Duration::from_secs(self.requeue_short_secs)
    }

    /// Get the not-ready retry duration
    #[must_use]
    pub fn not_ready_retry_duration(&self) -> Duration {
        Duration::from_secs(self.not_ready_retry_secs)
    }

    /// Get the per-invocation deadline
    #[must_use]
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Namespace to watch, or `None` for all namespaces
    #[must_use]
    pub fn watch_namespace(&self) -> Option<&str> {
        let ns = self.watch_namespace.trim();
        (!ns.is_empty()).then_some(ns)
    }
}
