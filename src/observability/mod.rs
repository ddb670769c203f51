//! # Observability
//!
//! Prometheus metrics and logging setup.

pub mod logging;
pub mod metrics;

pub use metrics::Metrics;
