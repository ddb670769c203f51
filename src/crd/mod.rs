//! # Custom Resource Definitions
//!
//! CRD types for the Catalog controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - Catalog specification and default values
//! - `source.rs` - Git source declarations and revision references
//! - `status.rs` - Status, conditions and the per-group child inventory

mod source;
mod spec;
mod status;

pub use source::{ApplyTarget, CatalogSource, SourceReference};
pub use spec::{default_interval, default_true, Catalog, CatalogSpec};
pub use status::{CatalogStatus, InventoryEntry};
