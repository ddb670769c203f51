//! Catalog Controller Library
//!
//! Turns `Catalog` resources into chained FluxCD source, artifact and apply
//! objects, and aggregates their readiness back onto the Catalog.
//!
//! ## Quick Start
//!
//! ```rust
//! use catalog_controller::prelude::*;
//! ```

pub mod conditions;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod store;
