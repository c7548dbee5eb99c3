//! Shared fixtures for integration tests
//!
//! Every store is in memory; the "target cluster" is a separate set of
//! stores so tests can tell operator-side and target-side objects apart.

#![allow(dead_code)]

use app_operator::config::{ControllerConfig, SharedControllerConfig};
use app_operator::controller::reconciler::{Reconciler, StaticTargetResolver, TargetStores};
use app_operator::crd::{
    App, AppCatalogEntry, AppSpec, Catalog, CatalogRepository, CatalogSpec, Chart, ObjectRef,
    ValuesConfig,
};
use app_operator::events::{EventPublisher, RecordingPublisher};
use app_operator::store::{MemoryStore, ObjectStore};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::api::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

pub const NAMESPACE: &str = "org-acme";
pub const CATALOG_NAMESPACE: &str = "default";
pub const STORAGE_URL: &str = "https://charts.example.com/stable/";

/// In-memory operator cluster plus one target cluster
pub struct World {
    pub apps: MemoryStore<App>,
    pub catalogs: MemoryStore<Catalog>,
    pub entries: MemoryStore<AppCatalogEntry>,
    pub config_maps: MemoryStore<ConfigMap>,
    pub secrets: MemoryStore<Secret>,
    pub target_namespaces: MemoryStore<Namespace>,
    pub target_config_maps: MemoryStore<ConfigMap>,
    pub target_secrets: MemoryStore<Secret>,
    pub target_charts: MemoryStore<Chart>,
    pub events: Arc<RecordingPublisher>,
    pub config: SharedControllerConfig,
}

impl World {
    pub fn new() -> Self {
        Self {
            apps: MemoryStore::new(),
            catalogs: MemoryStore::new(),
            entries: MemoryStore::new(),
            config_maps: MemoryStore::new(),
            secrets: MemoryStore::new(),
            target_namespaces: MemoryStore::new(),
            target_config_maps: MemoryStore::new(),
            target_secrets: MemoryStore::new(),
            target_charts: MemoryStore::new(),
            events: Arc::new(RecordingPublisher::new()),
            config: Arc::new(RwLock::new(ControllerConfig::default())),
        }
    }

    pub fn target(&self) -> TargetStores {
        TargetStores {
            namespaces: Arc::new(self.target_namespaces.clone()),
            config_maps: Arc::new(self.target_config_maps.clone()),
            secrets: Arc::new(self.target_secrets.clone()),
            charts: Arc::new(self.target_charts.clone()),
            remote: false,
        }
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        let events: Arc<dyn EventPublisher> = self.events.clone();
        Arc::new(Reconciler {
            apps: Arc::new(self.apps.clone()),
            catalogs: Arc::new(self.catalogs.clone()),
            config_maps: Arc::new(self.config_maps.clone()),
            secrets: Arc::new(self.secrets.clone()),
            targets: Arc::new(StaticTargetResolver::new(self.target())),
            events,
            config: Arc::clone(&self.config),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Current state of an App as stored
    pub async fn app(&self, name: &str) -> Option<App> {
        self.apps
            .get(&app_operator::store::ObjectKey::namespaced(NAMESPACE, name))
            .await
            .unwrap()
    }
}

pub fn object_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

pub fn catalog(name: &str, config: Option<ValuesConfig>) -> Catalog {
    let mut catalog = Catalog::new(
        name,
        CatalogSpec {
            title: name.to_string(),
            storage: Some(CatalogRepository {
                r#type: "helm".to_string(),
                url: STORAGE_URL.to_string(),
            }),
            config,
            ..CatalogSpec::default()
        },
    );
    catalog.metadata.namespace = Some(CATALOG_NAMESPACE.to_string());
    catalog
}

pub fn app(name: &str, catalog: &str) -> App {
    let mut app = App::new(
        name,
        AppSpec {
            name: "nginx".to_string(),
            version: "1.2.3".to_string(),
            catalog: catalog.to_string(),
            namespace: "web".to_string(),
            ..AppSpec::default()
        },
    );
    app.metadata.namespace = Some(NAMESPACE.to_string());
    app
}

pub fn values_config_map(namespace: &str, name: &str, values: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([("values".to_string(), values.to_string())])),
        ..ConfigMap::default()
    }
}

pub fn values_secret(namespace: &str, name: &str, values: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        string_data: Some(BTreeMap::from([("values".to_string(), values.to_string())])),
        ..Secret::default()
    }
}
