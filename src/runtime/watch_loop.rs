//! # Watch Loops
//!
//! The App and Catalog controllers, each restarted when its stream ends
//! until a shutdown signal marks the server as not ready.

use crate::config::SharedControllerConfig;
use crate::controller::catalog::{reconcile_catalog, CatalogDeriver};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::{App, Catalog};
use crate::observability;
use crate::runtime::error_policy::{handle_catalog_error, handle_reconciliation_error, log_stream_error};
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::{watcher, Controller};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Mark the server as not ready once SIGINT/SIGTERM arrives
pub fn spawn_shutdown_handler(server_state: Arc<ServerState>) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        server_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });
}

/// Run `run_once` until shutdown, sleeping the restart delay between runs
async fn supervise<F, Fut>(
    name: &'static str,
    server_state: Arc<ServerState>,
    config: SharedControllerConfig,
    mut run_once: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        if !server_state.ready() {
            info!("Shutdown requested, exiting {} loop", name);
            break;
        }
        let span = tracing::span!(tracing::Level::INFO, "controller.watch", controller = name);
        run_once().instrument(span).await;

        if !server_state.ready() {
            info!("Shutdown requested, exiting {} loop", name);
            break;
        }
        let delay = config.read().await.watch_restart_delay();
        warn!(
            "{} controller stream ended, restarting in {} seconds...",
            name,
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }
    info!("{} controller stopped gracefully", name);
}

fn log_result<T: std::fmt::Debug, E: std::fmt::Debug>(result: &Result<T, E>) {
    match result {
        Ok(obj) => debug!(object = ?obj, "watch.event.success"),
        Err(e) => {
            if log_stream_error(&format!("{e:?}")) {
                observability::metrics::increment_reconciliation_errors();
            }
        }
    }
}

/// Run the App controller
///
/// Only Apps matching this instance's sharding selector are watched.
pub async fn run_app_controller(
    apps: Api<App>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: SharedControllerConfig,
) {
    let selector = config.read().await.app_selector();
    info!(selector = selector.as_str(), "Starting App controller");
    supervise("App", server_state, config, || {
        Controller::new(
            apps.clone(),
            watcher::Config::default().labels(&selector).any_semantic(),
        )
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler.clone())
        .for_each(|result| {
            log_result(&result);
            futures::future::ready(())
        })
    })
    .await;
}

/// Run the Catalog controller
pub async fn run_catalog_controller(
    catalogs: Api<Catalog>,
    deriver: Arc<CatalogDeriver>,
    server_state: Arc<ServerState>,
    config: SharedControllerConfig,
) {
    info!("Starting Catalog controller");
    supervise("Catalog", server_state, config, || {
        Controller::new(catalogs.clone(), watcher::Config::default().any_semantic())
            .shutdown_on_signal()
            .run(reconcile_catalog, handle_catalog_error, deriver.clone())
            .for_each(|result| {
                log_result(&result);
                futures::future::ready(())
            })
    })
    .await;
}
