//! # Change Propagation
//!
//! One loop per value kind. Watches marked ConfigMaps or Secrets and, when
//! one changes, patches its new version token onto every App that depends on
//! it so that the App controller runs a fresh pass.

use crate::config::SharedControllerConfig;
use crate::constants::LABEL_WATCHING;
use crate::controller::reconciler::values::ValuesObject;
use crate::controller::watcher::index::{DependantKey, OwnerKey, ReverseIndex};
use crate::crd::App;
use crate::events::{EventPublisher, OperatorEvent};
use crate::observability::metrics;
use crate::store::{version_token, MetadataPatch, ObjectKey, ObjectStore, StoreError};
use futures::StreamExt;
use kube::{Resource, ResourceExt};
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Label selector of marked value objects
#[must_use]
pub fn watched_selector() -> String {
    format!("{LABEL_WATCHING}=true")
}

/// Propagates changes of one value kind to dependent Apps
pub struct Propagator<K: ValuesObject> {
    pub store: Arc<dyn ObjectStore<K>>,
    pub apps: Arc<dyn ObjectStore<App>>,
    pub index: Arc<ReverseIndex>,
    pub events: Arc<dyn EventPublisher>,
    pub config: SharedControllerConfig,
}

impl<K: ValuesObject> std::fmt::Debug for Propagator<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Propagator")
            .field("kind", &K::KIND)
            .finish_non_exhaustive()
    }
}

impl<K: ValuesObject> Propagator<K> {
    /// Highest version token among the marked objects right now
    ///
    /// # Errors
    ///
    /// Returns the store error when the marked objects cannot be listed.
    pub async fn start_guard(&self) -> Result<Option<u64>, StoreError> {
        let marked = self.store.list(None, Some(&watched_selector())).await?;
        Ok(marked.iter().filter_map(|obj| version_token(obj.meta())).max())
    }

    /// Propagate one observed object; returns the number of Apps patched
    ///
    /// Objects whose token is at or below `guard` were already present when
    /// the loop started and are skipped.
    pub async fn handle(&self, obj: &K, guard: Option<u64>) -> usize {
        let Some(version) = obj.meta().resource_version.clone() else {
            return 0;
        };
        if let (Some(token), Some(guard)) = (version_token(obj.meta()), guard) {
            if token <= guard {
                return 0;
            }
        }

        let dependant = DependantKey::new(
            K::VALUE_KIND,
            obj.namespace().unwrap_or_default(),
            obj.name_any(),
        );
        let owners = self.index.owners_of(&dependant);
        if owners.is_empty() {
            debug!(dependant = %dependant, "No App depends on changed object");
            return 0;
        }

        let mut patched = 0;
        for owner in owners {
            match self.notify(&owner, &dependant, &version).await {
                Ok(()) => patched += 1,
                Err(e) => warn!(
                    dependant = %dependant,
                    resource.name = owner.name.as_str(),
                    resource.namespace = owner.namespace.as_str(),
                    error = %e,
                    "Failed to propagate change to App"
                ),
            }
        }
        patched
    }

    async fn notify(
        &self,
        owner: &OwnerKey,
        dependant: &DependantKey,
        version: &str,
    ) -> Result<(), StoreError> {
        let key = ObjectKey::namespaced(&owner.namespace, &owner.name);
        let patch = MetadataPatch::default().annotation(K::VERSION_ANNOTATION, Some(version));
        let app = self.apps.patch_metadata(&key, &patch).await?;

        info!(
            dependant = %dependant,
            resource.name = owner.name.as_str(),
            resource.namespace = owner.namespace.as_str(),
            version,
            "Propagated change to App"
        );
        metrics::increment_dependency_propagations(K::KIND);
        self.events
            .publish(
                &app.object_ref(&()),
                OperatorEvent::normal(
                    &format!("{}Changed", K::KIND),
                    "Propagate",
                    format!("{dependant} changed to version {version}"),
                ),
            )
            .await;
        Ok(())
    }

    /// Consume one watch session until it errors or ends
    pub async fn watch_once(&self) -> Result<(), StoreError> {
        let guard = self.start_guard().await?;
        debug!(kind = K::KIND, guard = ?guard, "Propagation loop armed");
        let mut stream = self.store.watch(Some(&watched_selector()));
        while let Some(event) = stream.next().await {
            match event? {
                watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                    self.handle(&obj, guard).await;
                }
                watcher::Event::Init | watcher::Event::InitDone | watcher::Event::Delete(_) => {}
            }
        }
        Ok(())
    }

    /// Run forever, restarting after each failed or finished session
    pub async fn run(self) {
        let span = tracing::span!(tracing::Level::INFO, "watcher.propagate", kind = K::KIND);
        async move {
            info!("Starting {} propagation loop", K::KIND);
            loop {
                match self.watch_once().await {
                    Ok(()) => warn!("{} watch ended, restarting", K::KIND),
                    Err(e) => warn!(error = %e, "{} watch failed, restarting", K::KIND),
                }
                let delay = self.config.read().await.watch_restart_delay();
                tokio::time::sleep(delay).await;
            }
        }
        .instrument(span)
        .await;
    }
}
