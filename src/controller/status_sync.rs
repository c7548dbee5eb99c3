//! # Status Synchronizer
//!
//! Mirrors the release status the installer writes on a Chart into the App
//! of the same name and namespace as soon as it changes, instead of waiting
//! for the App's next periodic pass.

use crate::config::SharedControllerConfig;
use crate::constants::{LABEL_MANAGED_BY, OPERATOR_NAME};
use crate::controller::reconciler::status::{release_fields_differ, status_from_chart};
use crate::crd::{App, Chart};
use crate::observability::metrics;
use crate::store::selector::LabelSelector;
use crate::store::{ObjectKey, ObjectStore, StoreError};
use futures::StreamExt;
use kube::ResourceExt;
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Selector of the Charts written by this operator
#[must_use]
pub fn managed_charts_selector() -> String {
    format!("{LABEL_MANAGED_BY}={OPERATOR_NAME}")
}

#[derive(Clone)]
pub struct StatusSynchronizer {
    pub charts: Arc<dyn ObjectStore<Chart>>,
    pub apps: Arc<dyn ObjectStore<App>>,
    pub config: SharedControllerConfig,
}

impl std::fmt::Debug for StatusSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSynchronizer").finish_non_exhaustive()
    }
}

impl StatusSynchronizer {
    /// Copy a Chart's release status onto its App; true when the App changed
    ///
    /// Charts without a matching App, or whose App belongs to another
    /// instance, are ignored.
    ///
    /// # Errors
    ///
    /// Returns the store error of the App lookup or the status patch.
    pub async fn sync_chart(&self, chart: &Chart) -> Result<bool, StoreError> {
        let key = ObjectKey::of(chart);
        let Some(app) = self.apps.get(&key).await? else {
            debug!(chart = %key, "No App for Chart");
            return Ok(false);
        };
        let selector = LabelSelector::parse(&self.config.read().await.app_selector());
        if !selector.matches(app.metadata.labels.as_ref()) {
            return Ok(false);
        }

        let current = app.status.clone().unwrap_or_default();
        let mut desired = status_from_chart(Some(chart));
        if !release_fields_differ(&current, &desired) {
            return Ok(false);
        }
        desired.observed_generation = current.observed_generation;
        let value = serde_json::to_value(&desired).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.apps.patch_status(&key, value).await?;

        info!(
            resource.name = app.name_any().as_str(),
            resource.namespace = key.namespace.as_deref().unwrap_or_default(),
            release = desired.release.status.as_str(),
            "App status synced from Chart"
        );
        metrics::increment_status_syncs();
        Ok(true)
    }

    /// Consume one watch session until it errors or ends
    pub async fn watch_once(&self) -> Result<(), StoreError> {
        let mut stream = self.charts.watch(Some(&managed_charts_selector()));
        while let Some(event) = stream.next().await {
            match event? {
                watcher::Event::Apply(chart) | watcher::Event::InitApply(chart) => {
                    if let Err(e) = self.sync_chart(&chart).await {
                        warn!(chart = %ObjectKey::of(&chart), error = %e, "Failed to sync App status");
                    }
                }
                watcher::Event::Init | watcher::Event::InitDone | watcher::Event::Delete(_) => {}
            }
        }
        Ok(())
    }

    /// Run forever, restarting after each failed or finished session
    pub async fn run(self) {
        let span = tracing::span!(tracing::Level::INFO, "watcher.status_sync");
        async move {
            info!("Starting status sync loop");
            loop {
                match self.watch_once().await {
                    Ok(()) => warn!("Chart watch ended, restarting"),
                    Err(e) => warn!(error = %e, "Chart watch failed, restarting"),
                }
                let delay = self.config.read().await.watch_restart_delay();
                tokio::time::sleep(delay).await;
            }
        }
        .instrument(span)
        .await;
    }
}
