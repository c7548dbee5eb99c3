//! # Dependency Index Maintenance
//!
//! Keeps the [`ReverseIndex`] in line with the live App set and marks the
//! value objects Apps depend on.
//!
//! The loop is an explicit two-state machine:
//! - `Rebuilding`: list every App matching the sharding selector and rebuild
//!   the index from scratch
//! - `Streaming`: apply App changes one by one; a re-list inside the stream
//!   (`Init` .. `InitDone`) is treated as another full rebuild
//!
//! A stream error or end goes back to `Rebuilding`.

use crate::config::SharedControllerConfig;
use crate::constants::LABEL_WATCHING;
use crate::controller::reconciler::values::{value_sources, ValuesObject};
use crate::controller::watcher::index::{
    DependantKey, IndexDelta, OwnerKey, ReverseIndex, ValueKind,
};
use crate::crd::{App, Catalog};
use crate::observability::metrics;
use crate::store::{MetadataPatch, ObjectKey, ObjectStore, StoreError, WatchStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use kube_runtime::watcher;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// State of the index loop
pub enum WatchState {
    Rebuilding,
    Streaming {
        stream: WatchStream<App>,
        /// Apps collected during an in-stream re-list
        relist: Option<Vec<App>>,
    },
}

impl std::fmt::Debug for WatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchState::Rebuilding => f.write_str("Rebuilding"),
            WatchState::Streaming { relist, .. } => f
                .debug_struct("Streaming")
                .field("relisting", &relist.is_some())
                .finish_non_exhaustive(),
        }
    }
}

/// Maintains the reverse index and the watched markers
#[derive(Clone)]
pub struct DependencyWatcher {
    pub apps: Arc<dyn ObjectStore<App>>,
    pub catalogs: Arc<dyn ObjectStore<Catalog>>,
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub index: Arc<ReverseIndex>,
    pub config: SharedControllerConfig,
}

impl std::fmt::Debug for DependencyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyWatcher")
            .field("indexed", &self.index.len())
            .finish_non_exhaustive()
    }
}

fn refs_of<K: ValuesObject>(
    sources: &[&crate::crd::ValuesConfig],
    out: &mut HashSet<DependantKey>,
) {
    for config in sources {
        if let Some(r) = K::source_ref(config) {
            out.insert(DependantKey::new(K::VALUE_KIND, &r.namespace, &r.name));
        }
    }
}

impl DependencyWatcher {
    /// Value objects an App declares: own, catalog-level and user values,
    /// ConfigMap and Secret each
    pub async fn dependencies_of(&self, app: &App) -> HashSet<DependantKey> {
        let catalog_namespace = {
            let config = self.config.read().await;
            app.catalog_namespace(&config.default_catalog_namespace)
                .to_string()
        };
        let catalog_key = ObjectKey::namespaced(&catalog_namespace, &app.spec.catalog);
        let catalog = match self.catalogs.get(&catalog_key).await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(catalog = %catalog_key, error = %e, "Failed to read catalog, skipping its values");
                None
            }
        };

        let sources = value_sources(catalog.as_ref(), app);
        let mut deps = HashSet::new();
        refs_of::<ConfigMap>(&sources, &mut deps);
        refs_of::<Secret>(&sources, &mut deps);
        deps
    }

    async fn selector(&self) -> String {
        self.config.read().await.app_selector()
    }

    /// List all Apps and rebuild the index from scratch
    ///
    /// # Errors
    ///
    /// Returns the store error when the Apps cannot be listed.
    pub async fn rebuild(&self) -> Result<(), StoreError> {
        let selector = self.selector().await;
        let apps = self.apps.list(None, Some(&selector)).await?;
        self.rebuild_from(apps).await;
        Ok(())
    }

    async fn rebuild_from(&self, apps: Vec<App>) {
        let mut entries = Vec::with_capacity(apps.len());
        for app in &apps {
            entries.push((owner_key(app), self.dependencies_of(app).await));
        }
        let delta = self.index.replace_all(entries);
        info!(
            apps = apps.len(),
            dependants = self.index.len(),
            unmarked = delta.unmark.len(),
            "Dependency index rebuilt"
        );
        metrics::increment_index_rebuilds();
        self.apply_delta(delta).await;
    }

    /// Apply one App change
    pub async fn apply_app(&self, app: &App) {
        let deps = self.dependencies_of(app).await;
        let delta = self.index.upsert(owner_key(app), deps);
        self.apply_delta(delta).await;
    }

    /// Forget a deleted App
    pub async fn remove_app(&self, app: &App) {
        let delta = self.index.remove(&owner_key(app));
        self.apply_delta(delta).await;
    }

    async fn apply_delta(&self, delta: IndexDelta) {
        for dep in &delta.mark {
            self.set_marker(dep, true).await;
        }
        for dep in &delta.unmark {
            self.set_marker(dep, false).await;
        }
        metrics::set_watched_dependants(i64::try_from(self.index.len()).unwrap_or(i64::MAX));
    }

    async fn set_marker(&self, dep: &DependantKey, watched: bool) {
        let result = match dep.kind {
            ValueKind::ConfigMap => mark(&*self.config_maps, dep, watched).await,
            ValueKind::Secret => mark(&*self.secrets, dep, watched).await,
        };
        match result {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => warn!(dependant = %dep, error = %e, "Failed to update watched marker"),
        }
    }

    /// Advance the state machine by one step
    pub async fn step(&self, state: WatchState) -> WatchState {
        match state {
            WatchState::Rebuilding => match self.rebuild().await {
                Ok(()) => {
                    let selector = self.selector().await;
                    WatchState::Streaming {
                        stream: self.apps.watch(Some(&selector)),
                        relist: None,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Dependency index rebuild failed");
                    self.restart_delay().await;
                    WatchState::Rebuilding
                }
            },
            WatchState::Streaming { mut stream, mut relist } => match stream.next().await {
                Some(Ok(event)) => {
                    self.handle_event(event, &mut relist).await;
                    WatchState::Streaming { stream, relist }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "App watch failed, rebuilding dependency index");
                    self.restart_delay().await;
                    WatchState::Rebuilding
                }
                None => {
                    warn!("App watch ended, rebuilding dependency index");
                    WatchState::Rebuilding
                }
            },
        }
    }

    async fn handle_event(&self, event: watcher::Event<App>, relist: &mut Option<Vec<App>>) {
        match event {
            watcher::Event::Init => *relist = Some(Vec::new()),
            watcher::Event::InitApply(app) => match relist.as_mut() {
                Some(apps) => apps.push(app),
                None => self.apply_app(&app).await,
            },
            watcher::Event::InitDone => {
                if let Some(apps) = relist.take() {
                    self.rebuild_from(apps).await;
                }
            }
            watcher::Event::Apply(app) => {
                debug!(resource.name = app.name_any().as_str(), "App changed");
                self.apply_app(&app).await;
            }
            watcher::Event::Delete(app) => {
                debug!(resource.name = app.name_any().as_str(), "App deleted");
                self.remove_app(&app).await;
            }
        }
    }

    async fn restart_delay(&self) {
        let delay = self.config.read().await.watch_restart_delay();
        tokio::time::sleep(delay).await;
    }

    /// Run forever
    pub async fn run(self) {
        let span = tracing::span!(tracing::Level::INFO, "watcher.dependencies");
        async move {
            info!("Starting dependency index loop");
            let mut state = WatchState::Rebuilding;
            loop {
                state = self.step(state).await;
            }
        }
        .instrument(span)
        .await;
    }
}

fn owner_key(app: &App) -> OwnerKey {
    OwnerKey::new(app.namespace().unwrap_or_default(), app.name_any())
}

async fn mark<K: ValuesObject>(
    store: &dyn ObjectStore<K>,
    dep: &DependantKey,
    watched: bool,
) -> Result<(), StoreError> {
    let key = ObjectKey::namespaced(&dep.namespace, &dep.name);
    let Some(obj) = store.get(&key).await? else {
        return Ok(());
    };
    let present = obj
        .meta()
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_WATCHING))
        .is_some_and(|v| v == "true");
    if present == watched {
        return Ok(());
    }
    let patch = MetadataPatch::default().label(LABEL_WATCHING, watched.then_some("true"));
    store.patch_metadata(&key, &patch).await?;
    debug!(dependant = %dep, watched, "Updated watched marker");
    Ok(())
}
