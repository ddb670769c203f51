//! # Controller
//!
//! - `lifecycle`: generic reconcile state machine (finalizer, deletion, status write)
//! - `routine`: ordered routine pipeline executor
//! - `catalog`: the Catalog orchestrator and its child chain
//! - `grouping`: source locator parsing and group keys
//! - `validation`: Kubernetes duration parsing
//! - `reconciler`: `kube_runtime` glue
//! - `backoff`: Fibonacci backoff for failing resources
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod catalog;
pub mod grouping;
pub mod lifecycle;
pub mod reconciler;
pub mod routine;
pub mod server;
pub mod validation;
