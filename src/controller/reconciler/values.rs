//! # Values Stages
//!
//! Derived values objects consumed by the installer: `{app}-chart-values`
//! (ConfigMap) and `{app}-chart-secrets` (Secret), in the App's namespace of
//! the target cluster.
//!
//! Content is the deep merge of up to three sources, later winning:
//! catalog config < App config < user config. Each source holds YAML under
//! the `values` data key. Mappings merge key by key; any other value
//! replaces what was there.

use crate::constants::{
    ANNOTATION_CONFIGMAP_VERSION, ANNOTATION_SECRET_VERSION, LABEL_MANAGED_BY, OPERATOR_NAME,
    VALUES_KEY,
};
use crate::controller::reconciler::resource::{
    diff_objects, tolerate_exists, tolerate_missing, Change, ManagedResource, Pass,
};
use crate::controller::reconciler::target::TargetStores;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError, StageError};
use crate::controller::watcher::index::ValueKind;
use crate::crd::{App, Catalog, ObjectRef, ValuesConfig};
use crate::store::{ObjectKey, ObjectStore};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::Resource;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// A kind that can carry values YAML
pub trait ValuesObject: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static {
    /// Kind name used in logs, metrics and index keys
    const KIND: &'static str;
    /// Suffix of the derived object name
    const SUFFIX: &'static str;
    const VALUE_KIND: ValueKind;
    /// Annotation patched on dependent Apps when an object of this kind changes
    const VERSION_ANNOTATION: &'static str;

    /// Reference of this kind inside a values config
    fn source_ref(config: &ValuesConfig) -> Option<&ObjectRef>;

    /// YAML under the `values` key
    fn values(&self) -> Option<String>;

    fn build(meta: ObjectMeta, values: String) -> Self;

    /// Whether both carry the same data
    fn same_payload(&self, other: &Self) -> bool;

    fn take_payload(&mut self, from: Self);

    fn source_store(reconciler: &Reconciler) -> &Arc<dyn ObjectStore<Self>>;

    fn target_store(target: &TargetStores) -> &Arc<dyn ObjectStore<Self>>;
}

impl ValuesObject for ConfigMap {
    const KIND: &'static str = "ConfigMap";
    const SUFFIX: &'static str = "chart-values";
    const VALUE_KIND: ValueKind = ValueKind::ConfigMap;
    const VERSION_ANNOTATION: &'static str = ANNOTATION_CONFIGMAP_VERSION;

    fn source_ref(config: &ValuesConfig) -> Option<&ObjectRef> {
        config.config_map.as_ref()
    }

    fn values(&self) -> Option<String> {
        self.data.as_ref()?.get(VALUES_KEY).cloned()
    }

    fn build(metadata: ObjectMeta, values: String) -> Self {
        ConfigMap {
            metadata,
            data: Some(BTreeMap::from([(VALUES_KEY.to_string(), values)])),
            ..ConfigMap::default()
        }
    }

    fn same_payload(&self, other: &Self) -> bool {
        self.data == other.data
    }

    fn take_payload(&mut self, from: Self) {
        self.data = from.data;
    }

    fn source_store(reconciler: &Reconciler) -> &Arc<dyn ObjectStore<Self>> {
        &reconciler.config_maps
    }

    fn target_store(target: &TargetStores) -> &Arc<dyn ObjectStore<Self>> {
        &target.config_maps
    }
}

impl ValuesObject for Secret {
    const KIND: &'static str = "Secret";
    const SUFFIX: &'static str = "chart-secrets";
    const VALUE_KIND: ValueKind = ValueKind::Secret;
    const VERSION_ANNOTATION: &'static str = ANNOTATION_SECRET_VERSION;

    fn source_ref(config: &ValuesConfig) -> Option<&ObjectRef> {
        config.secret.as_ref()
    }

    fn values(&self) -> Option<String> {
        if let Some(bytes) = self.data.as_ref().and_then(|d| d.get(VALUES_KEY)) {
            return Some(String::from_utf8_lossy(&bytes.0).into_owned());
        }
        self.string_data.as_ref()?.get(VALUES_KEY).cloned()
    }

    fn build(metadata: ObjectMeta, values: String) -> Self {
        Secret {
            metadata,
            data: Some(BTreeMap::from([(
                VALUES_KEY.to_string(),
                ByteString(values.into_bytes()),
            )])),
            ..Secret::default()
        }
    }

    fn same_payload(&self, other: &Self) -> bool {
        self.data == other.data
    }

    fn take_payload(&mut self, from: Self) {
        self.data = from.data;
        self.string_data = None;
    }

    fn source_store(reconciler: &Reconciler) -> &Arc<dyn ObjectStore<Self>> {
        &reconciler.secrets
    }

    fn target_store(target: &TargetStores) -> &Arc<dyn ObjectStore<Self>> {
        &target.secrets
    }
}

/// Name of the derived values object of an App
pub fn derived_name<K: ValuesObject>(app_name: &str) -> String {
    format!("{app_name}-{}", K::SUFFIX)
}

/// Deep-merge `overlay` into `base`
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Parse one values document; blank and null documents contribute nothing
pub fn parse_values(source: &str, raw: &str) -> Result<Option<Value>, ReconcilerError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Null) => Ok(None),
        Ok(value @ Value::Mapping(_)) => Ok(Some(value)),
        Ok(_) => Err(ReconcilerError::Values(format!(
            "{source}: values must be a mapping"
        ))),
        Err(e) => Err(ReconcilerError::Values(format!("{source}: {e}"))),
    }
}

/// Value object references of an App in precedence order (lowest first)
pub fn value_sources<'a>(catalog: Option<&'a Catalog>, app: &'a App) -> Vec<&'a ValuesConfig> {
    catalog
        .and_then(|c| c.spec.config.as_ref())
        .into_iter()
        .chain(app.spec.config.as_ref())
        .chain(app.spec.user_config.as_ref())
        .collect()
}

/// Derived values object of one kind
#[derive(Debug)]
pub struct ValuesStage<K> {
    _kind: PhantomData<fn() -> K>,
}

impl<K> Default for ValuesStage<K> {
    fn default() -> Self {
        Self { _kind: PhantomData }
    }
}

impl<K: ValuesObject> ValuesStage<K> {
    fn key(app: &App) -> ObjectKey {
        ObjectKey {
            namespace: app.metadata.namespace.clone(),
            name: derived_name::<K>(app.metadata.name.as_deref().unwrap_or_default()),
        }
    }

    async fn merged(app: &App, pass: &Pass<'_>) -> Result<Option<String>, StageError> {
        let catalog_key = ObjectKey::namespaced(&pass.catalog_namespace, &app.spec.catalog);
        let catalog = pass
            .reconciler
            .catalogs
            .get(&catalog_key)
            .await?
            .ok_or_else(|| StageError::Cancel(format!("catalog {catalog_key} not found")))?;

        let mut merged: Option<Value> = None;
        for config in value_sources(Some(&catalog), app) {
            let Some(source) = K::source_ref(config) else {
                continue;
            };
            let key = ObjectKey::namespaced(&source.namespace, &source.name);
            let obj = K::source_store(pass.reconciler)
                .get(&key)
                .await?
                .ok_or_else(|| StageError::Cancel(format!("{} {key} not found", K::KIND)))?;
            let Some(raw) = obj.values() else {
                continue;
            };
            let Some(values) = parse_values(&format!("{} {key}", K::KIND), &raw)? else {
                continue;
            };
            match merged.as_mut() {
                Some(base) => merge_values(base, values),
                None => merged = Some(values),
            }
        }

        merged
            .map(|values| {
                serde_yaml::to_string(&values)
                    .map_err(|e| StageError::Failed(ReconcilerError::Values(e.to_string())))
            })
            .transpose()
    }
}

fn managed_labels_match(current: &ObjectMeta) -> bool {
    current
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_MANAGED_BY))
        .is_some_and(|v| v == OPERATOR_NAME)
}

#[async_trait]
impl<K: ValuesObject> ManagedResource for ValuesStage<K> {
    type State = K;

    fn name(&self) -> &'static str {
        K::SUFFIX
    }

    async fn current(&self, app: &App, pass: &Pass<'_>) -> Result<Option<K>, StageError> {
        K::target_store(pass.target)
            .get(&Self::key(app))
            .await
            .map_err(|e| pass.target.stage_error(e))
    }

    async fn desired(&self, app: &App, pass: &Pass<'_>) -> Result<Option<K>, StageError> {
        if pass.deleting {
            return Ok(None);
        }
        let Some(values) = Self::merged(app, pass).await? else {
            return Ok(None);
        };
        let key = Self::key(app);
        let metadata = ObjectMeta {
            name: Some(key.name),
            namespace: key.namespace,
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED_BY.to_string(),
                OPERATOR_NAME.to_string(),
            )])),
            ..ObjectMeta::default()
        };
        Ok(Some(K::build(metadata, values)))
    }

    fn diff(&self, current: Option<K>, desired: Option<K>) -> Change<K> {
        diff_objects(
            current,
            desired,
            |current, desired| {
                desired.same_payload(current) && managed_labels_match(current.meta())
            },
            |mut current, desired| {
                current
                    .meta_mut()
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .insert(LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string());
                current.take_payload(desired);
                current
            },
        )
    }

    async fn apply(&self, change: Change<K>, pass: &Pass<'_>) -> Result<(), StageError> {
        let store = K::target_store(pass.target);
        let result = match change {
            Change::NoOp => Ok(()),
            Change::Create(obj) => tolerate_exists(store.create(&obj).await),
            Change::Update(obj) => store.replace(&obj).await.map(|_| ()),
            Change::Delete(obj) => tolerate_missing(store.delete(&ObjectKey::of(&obj)).await),
        };
        result.map_err(|e| pass.target.stage_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn later_sources_win_and_mappings_merge() {
        let mut base = yaml("image:\n  tag: v1\n  repo: nginx\nreplicas: 1\n");
        merge_values(&mut base, yaml("image:\n  tag: v2\nreplicas: 3\n"));
        assert_eq!(
            base,
            yaml("image:\n  tag: v2\n  repo: nginx\nreplicas: 3\n")
        );
    }

    #[test]
    fn scalars_replace_mappings() {
        let mut base = yaml("ingress:\n  enabled: true\n");
        merge_values(&mut base, yaml("ingress: false\n"));
        assert_eq!(base, yaml("ingress: false\n"));
    }

    #[test]
    fn blank_documents_contribute_nothing() {
        assert!(parse_values("cm", "  \n").unwrap().is_none());
        assert!(parse_values("cm", "~").unwrap().is_none());
    }

    #[test]
    fn non_mapping_documents_are_rejected() {
        assert!(matches!(
            parse_values("cm", "- a\n- b\n"),
            Err(ReconcilerError::Values(_))
        ));
    }

    #[test]
    fn derived_names_follow_kind() {
        assert_eq!(derived_name::<ConfigMap>("ingress"), "ingress-chart-values");
        assert_eq!(derived_name::<Secret>("ingress"), "ingress-chart-secrets");
    }

    #[test]
    fn secret_values_prefer_data_over_string_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                VALUES_KEY.to_string(),
                ByteString(b"a: 1\n".to_vec()),
            )])),
            string_data: Some(BTreeMap::from([(VALUES_KEY.to_string(), "a: 2\n".to_string())])),
            ..Secret::default()
        };
        assert_eq!(secret.values().as_deref(), Some("a: 1\n"));
    }
}
