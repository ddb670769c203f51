//! # Catalog Controller
//!
//! Kubernetes controller for `Catalog` resources. Each source listed in a
//! Catalog becomes a FluxCD chain: a `GitRepository` mirror, an
//! `ArtifactGenerator`, the `ExternalArtifact` it produces and a
//! `Kustomization` or `HelmRelease` that applies it. The Catalog's `Ready`
//! condition reports the first child in that chain that is not ready.
//!
//! ## Configuration
//!
//! Environment variables are read at startup, see `config::ControllerConfig`
//! and `config::ServerConfig`. `RUST_LOG` controls log filtering and
//! `LOG_FORMAT=json` switches to structured output.

use anyhow::Result;
use catalog_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.client,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await
}
