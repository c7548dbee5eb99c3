//! # Runtime
//!
//! Operator runtime: initialization, watch loops and error policy.
//!
//! Loops run as tokio tasks:
//! - App controller (kube-runtime `Controller`, drives shutdown)
//! - Catalog controller
//! - dependency index loop
//! - ConfigMap and Secret propagation loops
//! - status sync loop

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

use initialization::InitializationResult;
use std::sync::Arc;
use tracing::info;

/// Run every loop until the App controller shuts down
pub async fn run(init: InitializationResult) {
    watch_loop::spawn_shutdown_handler(Arc::clone(&init.server_state));

    let background = vec![
        tokio::spawn(init.dependencies.run()),
        tokio::spawn(init.config_map_propagator.run()),
        tokio::spawn(init.secret_propagator.run()),
        tokio::spawn(init.status_sync.run()),
        tokio::spawn(watch_loop::run_catalog_controller(
            init.catalogs,
            init.deriver,
            Arc::clone(&init.server_state),
            Arc::clone(&init.controller_config),
        )),
    ];

    watch_loop::run_app_controller(
        init.apps,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await;

    for task in background {
        task.abort();
    }
    info!("Operator stopped");
}
