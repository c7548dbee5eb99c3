//! # Initialization
//!
//! Operator startup: rustls, tracing, metrics, the probe server, the
//! Kubernetes client and every component context.

use crate::config::{create_shared_config, SharedControllerConfig, SharedServerConfig};
use crate::controller::catalog::{CatalogDeriver, HttpIndexSource};
use crate::controller::reconciler::{KubeTargetResolver, Reconciler};
use crate::controller::server::{start_server, ServerState};
use crate::controller::status_sync::StatusSynchronizer;
use crate::controller::watcher::{DependencyWatcher, Propagator, ReverseIndex};
use crate::crd::{App, AppCatalogEntry, Catalog, Chart};
use crate::events::{EventPublisher, KubeEventPublisher};
use crate::observability;
use crate::store::{KubeStore, ObjectStore};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{api::Api, Client};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Overrides given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub instance_id: Option<String>,
    pub metrics_port: Option<u16>,
}

/// Everything the operator runs
pub struct InitializationResult {
    pub client: Client,
    pub apps: Api<App>,
    pub catalogs: Api<Catalog>,
    pub reconciler: Arc<Reconciler>,
    pub deriver: Arc<CatalogDeriver>,
    pub dependencies: DependencyWatcher,
    pub config_map_propagator: Propagator<ConfigMap>,
    pub secret_propagator: Propagator<Secret>,
    pub status_sync: StatusSynchronizer,
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
    pub server_config: SharedServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
///
/// # Errors
///
/// Fails when metrics cannot be registered, the HTTP client cannot be built
/// or the Kubernetes client cannot be created.
pub async fn initialize(overrides: Overrides) -> Result<InitializationResult> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "app_operator=info".into()),
        )
        .init();

    info!("Starting App Operator v{}", env!("CARGO_PKG_VERSION"));

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let (controller_config, server_config) = create_shared_config();
    {
        let mut config = controller_config.write().await;
        if overrides.instance_id.is_some() {
            config.instance_id = overrides.instance_id;
        }
        info!(
            instance = config.instance_id.as_deref().unwrap_or("<none>"),
            selector = config.app_selector().as_str(),
            "Sharding configured"
        );
    }
    if let Some(port) = overrides.metrics_port {
        server_config.write().await.metrics_port = port;
    }

    let server_state = Arc::new(ServerState::new());
    let port = server_config.read().await.metrics_port;
    let state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = start_server(port, state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let apps: Arc<dyn ObjectStore<App>> = Arc::new(KubeStore::<App>::new(client.clone()));
    let catalogs: Arc<dyn ObjectStore<Catalog>> = Arc::new(KubeStore::<Catalog>::new(client.clone()));
    let entries: Arc<dyn ObjectStore<AppCatalogEntry>> =
        Arc::new(KubeStore::<AppCatalogEntry>::new(client.clone()));
    let charts: Arc<dyn ObjectStore<Chart>> = Arc::new(KubeStore::<Chart>::new(client.clone()));
    let config_maps: Arc<dyn ObjectStore<ConfigMap>> =
        Arc::new(KubeStore::<ConfigMap>::new(client.clone()));
    let secrets: Arc<dyn ObjectStore<Secret>> = Arc::new(KubeStore::<Secret>::new(client.clone()));

    let instance = controller_config.read().await.instance_id.clone();
    let events: Arc<dyn EventPublisher> = Arc::new(KubeEventPublisher::new(client.clone(), instance));
    let index = Arc::new(ReverseIndex::new());

    let reconciler = Arc::new(Reconciler {
        apps: Arc::clone(&apps),
        catalogs: Arc::clone(&catalogs),
        config_maps: Arc::clone(&config_maps),
        secrets: Arc::clone(&secrets),
        targets: Arc::new(KubeTargetResolver::new(&client, Arc::clone(&secrets))),
        events: Arc::clone(&events),
        config: Arc::clone(&controller_config),
        backoff_states: Arc::new(Mutex::new(HashMap::new())),
    });

    let http = HttpIndexSource::from_config(&controller_config).await?;
    let deriver = Arc::new(CatalogDeriver {
        catalogs: Arc::clone(&catalogs),
        entries,
        index: Arc::new(http),
        config: Arc::clone(&controller_config),
        backoff_states: Arc::new(Mutex::new(HashMap::new())),
    });

    let dependencies = DependencyWatcher {
        apps: Arc::clone(&apps),
        catalogs,
        config_maps: Arc::clone(&config_maps),
        secrets: Arc::clone(&secrets),
        index: Arc::clone(&index),
        config: Arc::clone(&controller_config),
    };
    let config_map_propagator = Propagator {
        store: config_maps,
        apps: Arc::clone(&apps),
        index: Arc::clone(&index),
        events: Arc::clone(&events),
        config: Arc::clone(&controller_config),
    };
    let secret_propagator = Propagator {
        store: secrets,
        apps: Arc::clone(&apps),
        index,
        events,
        config: Arc::clone(&controller_config),
    };
    let status_sync = StatusSynchronizer {
        charts,
        apps,
        config: Arc::clone(&controller_config),
    };

    server_state.set_ready(true);
    info!("Operator initialized, starting loops...");

    Ok(InitializationResult {
        apps: Api::all(client.clone()),
        catalogs: Api::all(client.clone()),
        client,
        reconciler,
        deriver,
        dependencies,
        config_map_propagator,
        secret_propagator,
        status_sync,
        server_state,
        controller_config,
        server_config,
    })
}
