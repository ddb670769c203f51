//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! All metrics live in a [`Registry`] owned by one [`Metrics`] value, created
//! at startup and shared by `Arc`. Tests create their own.
//!
//! ## Metrics Exposed
//!
//! - `catalog_controller_reconciliations_total{result}` - Reconciliations by result
//! - `catalog_controller_reconciliation_duration_seconds` - Duration of reconciliations
//! - `catalog_controller_child_writes_total{kind,operation}` - Writes to managed children
//! - `catalog_controller_requeues_total{reason}` - Requeues by reason
//! - `catalog_controller_build_info{version,git_hash}` - Always 1

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconcile_duration: Histogram,
    child_writes: IntCounterVec,
    requeues: IntCounterVec,
}

impl Metrics {
    /// Create and register every metric in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "catalog_controller_reconciliations_total",
                "Total number of reconciliations by result",
            ),
            &["result"],
        )?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "catalog_controller_reconciliation_duration_seconds",
                "Duration of reconciliation in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;
        let child_writes = IntCounterVec::new(
            Opts::new(
                "catalog_controller_child_writes_total",
                "Total number of writes to managed child objects",
            ),
            &["kind", "operation"],
        )?;
        let requeues = IntCounterVec::new(
            Opts::new(
                "catalog_controller_requeues_total",
                "Total number of requeues by reason",
            ),
            &["reason"],
        )?;
        let build_info = IntGaugeVec::new(
            Opts::new("catalog_controller_build_info", "Build information"),
            &["version", "git_hash"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(child_writes.clone()))?;
        registry.register(Box::new(requeues.clone()))?;
        registry.register(Box::new(build_info.clone()))?;

        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION"), env!("BUILD_GIT_HASH")])
            .set(1);

        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            child_writes,
            requeues,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// `result` is one of `success`, `error`, `timeout`
    pub fn record_reconciliation(&self, result: &str, elapsed: Duration) {
        self.reconciliations.with_label_values(&[result]).inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    pub fn record_child_write(&self, kind: &str, operation: &str) {
        self.child_writes.with_label_values(&[kind, operation]).inc();
    }

    pub fn record_requeue(&self, reason: &str) {
        self.requeues.with_label_values(&[reason]).inc();
    }

    #[must_use]
    pub fn reconciliations(&self, result: &str) -> u64 {
        self.reconciliations.with_label_values(&[result]).get()
    }

    #[must_use]
    pub fn child_writes(&self, kind: &str, operation: &str) -> u64 {
        self.child_writes.with_label_values(&[kind, operation]).get()
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_child_write("GitRepository", "create");

        assert_eq!(first.child_writes("GitRepository", "create"), 1);
        assert_eq!(second.child_writes("GitRepository", "create"), 0);
    }

    #[test]
    fn test_encode_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconciliation("success", Duration::from_millis(20));
        metrics.record_requeue("not-ready");

        let text = metrics.encode().unwrap();

        assert!(text.contains("catalog_controller_reconciliations_total{result=\"success\"} 1"));
        assert!(text.contains("catalog_controller_requeues_total{reason=\"not-ready\"} 1"));
        assert!(text.contains("catalog_controller_build_info"));
    }
}
