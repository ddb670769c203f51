//! # Watch Loop
//!
//! Runs the `Catalog` controller, which also watches every managed child kind
//! so a child's status change re-triggers its owner. The loop restarts the
//! controller stream after it ends and stops once a shutdown signal flips the
//! readiness flag.

use crate::config::SharedControllerConfig;
use crate::controller::catalog::DEPENDENCY_ORDER;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Catalog;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use kube::api::Api;
use kube::core::DynamicObject;
use kube::Client;
use kube_runtime::{watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

fn build_controller(client: &Client, namespace: Option<&str>) -> Controller<Catalog> {
    let catalogs: Api<Catalog> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let mut controller = Controller::new(catalogs, watcher::Config::default());

    for kind in DEPENDENCY_ORDER.iter().copied().filter(|kind| kind.is_managed()) {
        let resource = kind.api_resource();
        let children: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &resource),
            None => Api::all_with(client.clone(), &resource),
        };
        controller = controller.owns_with(children, resource, watcher::Config::default());
    }

    controller
}

/// Run the controller until a shutdown signal is received
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    let config = controller_config.read().await;
    let backoff_start_ms = config.watch_backoff_start_ms;
    let namespace = config.watch_namespace().map(str::to_string);
    drop(config);

    let backoff_ms = Arc::new(AtomicU64::new(backoff_start_ms));

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal, initiating graceful shutdown...");
        shutdown_state.is_ready.store(false, Ordering::Relaxed);
    });

    match namespace.as_deref() {
        Some(ns) => info!("Watching Catalogs in namespace {}", ns),
        None => info!("Watching Catalogs in all namespaces"),
    }

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff = Arc::clone(&backoff_ms);
        let filter_config = Arc::clone(&controller_config);

        info!("Starting controller watch loop...");
        build_controller(&client, namespace.as_deref())
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |event| {
                let backoff = Arc::clone(&backoff);
                let config = Arc::clone(&filter_config);
                async move {
                    match &event {
                        Ok((object, _action)) => {
                            let start = config.read().await.watch_backoff_start_ms;
                            backoff.store(start, Ordering::Relaxed);
                            debug!(resource = %object, "watch.event.success");
                            Some(event)
                        }
                        Err(e) => {
                            let rendered = format!("{e:?}");
                            let guard = config.read().await;
                            let max_backoff_ms = guard.watch_backoff_max_ms;
                            let restart_delay =
                                Duration::from_secs(guard.watch_restart_delay_secs);
                            drop(guard);
                            handle_watch_stream_error(
                                &rendered,
                                &backoff,
                                max_backoff_ms,
                                restart_delay,
                            )
                            .await
                            .then_some(event)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = controller_config.read().await.watch_restart_delay_after_end_secs;
        warn!("Controller watch stream ended, restarting in {} seconds...", delay);
        tokio::time::sleep(Duration::from_secs(delay)).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}
