//! # Catalog Reconciliation
//!
//! Derives the AppCatalogEntry objects of a Catalog from its repository
//! index and diff-applies them. Deleting a Catalog deletes every entry it
//! owns before its finalizer is released.

use crate::config::SharedControllerConfig;
use crate::constants::{
    ANNOTATION_METADATA_URL, CATALOG_FINALIZER, LABEL_CATALOG_NAME, LABEL_MANAGED_BY,
    OPERATOR_NAME,
};
use crate::controller::catalog::apply::{apply_entries, ApplySummary};
use crate::controller::catalog::derive::{build_entry, dedupe_entries, select_versions};
use crate::controller::catalog::index::{IndexSource, RepoIndex};
use crate::controller::reconciler::{BackoffState, ReconcilerError};
use crate::crd::{AppCatalogEntry, Catalog};
use crate::observability::metrics;
use crate::store::{MetadataPatch, ObjectKey, ObjectStore};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn, Instrument};

/// Context shared by every Catalog pass
#[derive(Clone)]
pub struct CatalogDeriver {
    pub catalogs: Arc<dyn ObjectStore<Catalog>>,
    pub entries: Arc<dyn ObjectStore<AppCatalogEntry>>,
    pub index: Arc<dyn IndexSource>,
    pub config: SharedControllerConfig,
    /// Backoff state per Catalog (namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for CatalogDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogDeriver")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Selector of the entries a Catalog owns
#[must_use]
pub fn owned_entries_selector(catalog: &str) -> String {
    format!("{LABEL_CATALOG_NAME}={catalog},{LABEL_MANAGED_BY}={OPERATOR_NAME}")
}

impl CatalogDeriver {
    /// Entries the Catalog should publish right now
    ///
    /// # Errors
    ///
    /// Returns `Fetch` when no repository of the Catalog answers.
    pub async fn desired_entries(
        &self,
        catalog: &Catalog,
    ) -> Result<Vec<AppCatalogEntry>, ReconcilerError> {
        if catalog.is_community() {
            debug!(catalog = catalog.name_any().as_str(), "Community catalog, no entries derived");
            return Ok(Vec::new());
        }
        let urls = catalog.storage_urls();
        if urls.is_empty() {
            warn!(catalog = catalog.name_any().as_str(), "Catalog has no repositories");
            return Ok(Vec::new());
        }
        let index = self.index.fetch_index(&urls).await?;
        let max = self.config.read().await.max_entries_per_app;
        Ok(self.derive(catalog, &index, max).await)
    }

    async fn derive(&self, catalog: &Catalog, index: &RepoIndex, max: usize) -> Vec<AppCatalogEntry> {
        let mut desired = Vec::new();
        for (chart, versions) in &index.entries {
            for selected in select_versions(chart, versions, max) {
                let metadata = match selected.entry.annotations.get(ANNOTATION_METADATA_URL) {
                    Some(url) => match self.index.fetch_metadata(url).await {
                        Ok(metadata) => Some(metadata),
                        Err(e) => {
                            warn!(
                                chart = chart.as_str(),
                                version = selected.entry.version.as_str(),
                                error = %e,
                                "Metadata unavailable, using index data only"
                            );
                            None
                        }
                    },
                    None => None,
                };
                desired.push(build_entry(catalog, chart, &selected, metadata.as_ref()));
            }
        }
        dedupe_entries(desired)
    }

    async fn owned_entries(&self, catalog: &Catalog) -> Result<Vec<AppCatalogEntry>, ReconcilerError> {
        let namespace = catalog.namespace().unwrap_or_default();
        Ok(self
            .entries
            .list(Some(&namespace), Some(&owned_entries_selector(&catalog.name_any())))
            .await?)
    }

    /// Derive and apply the entries of one Catalog
    ///
    /// # Errors
    ///
    /// Returns an error when the index cannot be fetched or the live entries
    /// cannot be listed. Per-entry failures are counted, not returned.
    pub async fn sync(&self, catalog: &Catalog) -> Result<ApplySummary, ReconcilerError> {
        let desired = self.desired_entries(catalog).await?;
        let current = self.owned_entries(catalog).await?;
        let summary = apply_entries(&*self.entries, current, desired).await;
        metrics::record_catalog_entries(
            summary.created,
            summary.updated,
            summary.deleted,
            summary.errored,
        );
        Ok(summary)
    }

    /// Delete every entry the Catalog owns
    ///
    /// # Errors
    ///
    /// Returns an error when the live entries cannot be listed.
    pub async fn cleanup(&self, catalog: &Catalog) -> Result<ApplySummary, ReconcilerError> {
        let current = self.owned_entries(catalog).await?;
        Ok(apply_entries(&*self.entries, current, Vec::new()).await)
    }

    async fn set_finalizer(&self, catalog: &Catalog, present: bool) -> Result<(), ReconcilerError> {
        let mut finalizers: Vec<String> = catalog
            .finalizers()
            .iter()
            .filter(|f| *f != CATALOG_FINALIZER)
            .cloned()
            .collect();
        if present {
            finalizers.push(CATALOG_FINALIZER.to_string());
        }
        self.catalogs
            .patch_metadata(&ObjectKey::of(catalog), &MetadataPatch::default().finalizers(finalizers))
            .await?;
        Ok(())
    }

    /// Forget the error history of a Catalog after a successful pass
    pub fn reset_backoff(&self, resource_key: &str) -> bool {
        match self.backoff_states.lock() {
            Ok(mut states) => states
                .remove(resource_key)
                .is_some_and(|state| state.error_count > 0),
            Err(_) => false,
        }
    }
}

/// Reconcile a Catalog
///
/// # Errors
///
/// Fetch and store failures are returned for the error policy to back off on.
pub async fn reconcile_catalog(
    catalog: Arc<Catalog>,
    ctx: Arc<CatalogDeriver>,
) -> Result<Action, ReconcilerError> {
    let name = catalog.name_any();
    let namespace = catalog.namespace().unwrap_or_default();
    let span = tracing::span!(
        tracing::Level::INFO,
        "catalog.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str()
    );
    reconcile_catalog_inner(&catalog, &ctx, &format!("{namespace}/{name}"))
        .instrument(span)
        .await
}

async fn reconcile_catalog_inner(
    catalog: &Catalog,
    ctx: &CatalogDeriver,
    resource_key: &str,
) -> Result<Action, ReconcilerError> {
    let has_finalizer = catalog.finalizers().iter().any(|f| f == CATALOG_FINALIZER);
    if catalog.meta().deletion_timestamp.is_some() {
        if !has_finalizer {
            return Ok(Action::await_change());
        }
        let summary = ctx.cleanup(catalog).await?;
        if summary.errored > 0 {
            return Err(ReconcilerError::ReconciliationFailed(anyhow::anyhow!(
                "{} entries could not be deleted",
                summary.errored
            )));
        }
        ctx.set_finalizer(catalog, false).await?;
        info!(deleted = summary.deleted, "Catalog deleted, entries removed");
        return Ok(Action::await_change());
    }
    if !has_finalizer {
        ctx.set_finalizer(catalog, true).await?;
    }

    let summary = ctx.sync(catalog).await?;
    info!(
        created = summary.created,
        updated = summary.updated,
        deleted = summary.deleted,
        errored = summary.errored,
        "Catalog entries synced"
    );
    if ctx.reset_backoff(resource_key) {
        info!("Catalog recovered, backoff reset");
    }

    metrics::increment_requeues_total("catalog-resync");
    let resync = ctx.config.read().await.catalog_resync_interval();
    Ok(Action::requeue(resync))
}
