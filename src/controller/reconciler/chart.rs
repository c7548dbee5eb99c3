//! # Chart Stage
//!
//! Writes the release intent an external installer acts on. The Chart shares
//! name and namespace with its App and lives in the target cluster.

use crate::constants::{LABEL_APP_NAME, LABEL_MANAGED_BY, OPERATOR_NAME};
use crate::controller::reconciler::resource::{
    diff_objects, tolerate_exists, tolerate_missing, Change, ManagedResource, Pass,
};
use crate::controller::reconciler::types::StageError;
use crate::controller::reconciler::values::{derived_name, ValuesObject};
use crate::crd::{App, Catalog, Chart, ChartConfig, ChartSpec, ChartValuesRef};
use crate::store::ObjectKey;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone, Copy)]
pub struct ChartStage;

/// Location of a packaged chart in a catalog's primary storage
#[must_use]
pub fn tarball_url(storage_url: &str, chart: &str, version: &str) -> String {
    format!("{}/{chart}-{version}.tgz", storage_url.trim().trim_end_matches('/'))
}

fn chart_key(app: &App) -> ObjectKey {
    ObjectKey {
        namespace: app.metadata.namespace.clone(),
        name: app.metadata.name.clone().unwrap_or_default(),
    }
}

fn chart_labels(app: &App) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (LABEL_APP_NAME.to_string(), app.spec.name.clone()),
    ])
}

/// Reference to a derived values object as it exists right now
async fn values_ref<K: ValuesObject>(
    app: &App,
    pass: &Pass<'_>,
) -> Result<Option<ChartValuesRef>, StageError> {
    let namespace = app.metadata.namespace.clone().unwrap_or_default();
    let name = derived_name::<K>(app.metadata.name.as_deref().unwrap_or_default());
    let found = K::target_store(pass.target)
        .get(&ObjectKey::namespaced(&namespace, &name))
        .await
        .map_err(|e| pass.target.stage_error(e))?;
    Ok(found.map(|obj| ChartValuesRef {
        name,
        namespace,
        resource_version: obj.meta().resource_version.clone().unwrap_or_default(),
    }))
}

fn labels_match(current: &Chart, desired: &Chart) -> bool {
    let current = current.metadata.labels.as_ref();
    desired
        .metadata
        .labels
        .iter()
        .flatten()
        .all(|(k, v)| current.and_then(|l| l.get(k)) == Some(v))
}

#[async_trait]
impl ManagedResource for ChartStage {
    type State = Chart;

    fn name(&self) -> &'static str {
        "chart"
    }

    async fn current(&self, app: &App, pass: &Pass<'_>) -> Result<Option<Chart>, StageError> {
        pass.target
            .charts
            .get(&chart_key(app))
            .await
            .map_err(|e| pass.target.stage_error(e))
    }

    async fn desired(&self, app: &App, pass: &Pass<'_>) -> Result<Option<Chart>, StageError> {
        if pass.deleting {
            return Ok(None);
        }
        let catalog_key = ObjectKey::namespaced(&pass.catalog_namespace, &app.spec.catalog);
        let catalog: Catalog = pass
            .reconciler
            .catalogs
            .get(&catalog_key)
            .await?
            .ok_or_else(|| StageError::Cancel(format!("catalog {catalog_key} not found")))?;
        let storage_url = catalog
            .storage_urls()
            .into_iter()
            .next()
            .ok_or_else(|| StageError::Cancel(format!("catalog {catalog_key} has no storage")))?;

        let key = chart_key(app);
        let mut chart = Chart::new(
            &key.name,
            ChartSpec {
                name: key.name.clone(),
                namespace: app.spec.namespace.clone(),
                version: app.spec.version.clone(),
                tarball_url: tarball_url(&storage_url, &app.spec.name, &app.spec.version),
                config: ChartConfig {
                    config_map: values_ref::<ConfigMap>(app, pass).await?,
                    secret: values_ref::<Secret>(app, pass).await?,
                },
            },
        );
        chart.metadata = ObjectMeta {
            name: Some(key.name),
            namespace: key.namespace,
            labels: Some(chart_labels(app)),
            ..ObjectMeta::default()
        };
        Ok(Some(chart))
    }

    fn diff(&self, current: Option<Chart>, desired: Option<Chart>) -> Change<Chart> {
        diff_objects(
            current,
            desired,
            |current, desired| current.spec == desired.spec && labels_match(current, desired),
            |mut current, desired| {
                let labels = current.metadata.labels.get_or_insert_with(BTreeMap::new);
                labels.extend(desired.metadata.labels.unwrap_or_default());
                current.spec = desired.spec;
                current
            },
        )
    }

    async fn apply(&self, change: Change<Chart>, pass: &Pass<'_>) -> Result<(), StageError> {
        let store = &pass.target.charts;
        let result = match change {
            Change::NoOp => Ok(()),
            Change::Create(chart) => tolerate_exists(store.create(&chart).await),
            Change::Update(chart) => store.replace(&chart).await.map(|_| ()),
            Change::Delete(chart) => tolerate_missing(store.delete(&ObjectKey::of(&chart)).await),
        };
        result.map_err(|e| pass.target.stage_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tarball_url_trims_trailing_slash() {
        assert_eq!(
            tarball_url("https://charts.example.com/stable/", "nginx", "1.2.3"),
            "https://charts.example.com/stable/nginx-1.2.3.tgz"
        );
        assert_eq!(
            tarball_url("https://charts.example.com", "nginx", "1.2.3"),
            "https://charts.example.com/nginx-1.2.3.tgz"
        );
    }

    #[test]
    fn label_comparison_ignores_foreign_labels() {
        let mut desired = Chart::new("a", ChartSpec::default());
        desired.metadata.labels = Some(BTreeMap::from([("x".to_string(), "1".to_string())]));
        let mut current = desired.clone();
        current
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("other".to_string(), "y".to_string());
        assert!(labels_match(&current, &desired));
        current.metadata.labels = None;
        assert!(!labels_match(&current, &desired));
    }
}
