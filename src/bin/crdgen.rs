//! # CRD Generator
//!
//! Prints the `Catalog` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/catalog.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use catalog_controller::crd::Catalog;
use kube::core::CustomResourceExt;

fn main() {
    match serde_yaml::to_string(&Catalog::crd()) {
        Ok(yaml) => {
            println!("# This file is auto-generated by crdgen");
            println!("# DO NOT EDIT THIS FILE MANUALLY");
            println!("---");
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
