//! # Initialization
//!
//! rustls, logging, metrics, the HTTP server, the Kubernetes client and the
//! reconciler context, in that order.

use crate::config::{create_shared_config, SharedControllerConfig, SharedServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::Catalog;
use crate::observability::{logging, Metrics};
use crate::store::{KubeStore, ObjectStore};
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
    pub server_config: SharedServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

pub async fn initialize() -> Result<InitializationResult> {
    // Must precede any TLS use by the kube client
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    let (controller_config, server_config) = create_shared_config();
    let log_format = controller_config.read().await.log_format.clone();
    logging::init_logging(&log_format);

    info!("Starting Catalog Controller v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: timestamp={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_GIT_HASH")
    );

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
        metrics: Arc::clone(&metrics),
    });
    let port = server_config.read().await.metrics_port;
    let server_handle = tokio::spawn({
        let state = Arc::clone(&server_state);
        async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {}", e);
            }
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    check_crd_installed(&client).await;

    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
    let current = controller_config.read().await.clone();
    let reconciler = Arc::new(Reconciler::new(
        store,
        metrics,
        Arc::clone(&controller_config),
        &current,
    ));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        controller_config,
        server_config,
    })
}

async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &SharedServerConfig,
) -> Result<()> {
    let config = server_config.read().await;
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    drop(config);
    let started = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if started.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Log loudly when the Catalog CRD is missing; the watch loop retries regardless
async fn check_crd_installed(client: &Client) {
    let catalogs: Api<Catalog> = Api::all(client.clone());
    match catalogs.list(&ListParams::default().limit(1)).await {
        Ok(list) => info!("Catalog CRD is queryable ({} listed)", list.items.len()),
        Err(e) => {
            error!("Catalog CRD is not queryable: {}. Is the CRD installed?", e);
            warn!("Continuing, the watch loop will retry");
        }
    }
}
