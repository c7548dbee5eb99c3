//! # In-memory Store
//!
//! [`ObjectStore`] kept in process memory. It reproduces the semantics the
//! reconciliation core depends on: monotonically increasing version tokens,
//! optimistic concurrency on replace, "not found"/"already exists" sentinels,
//! label selectors and watch streams (including the initial listing).
//!
//! Failures can be injected per operation and object name to exercise
//! partial-failure paths.

use super::selector::LabelSelector;
use super::{MetadataPatch, ObjectKey, ObjectStore, StoreError, WatchStream};
use async_trait::async_trait;
use futures::StreamExt;
use kube::Resource;
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Store operations failures can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Replace,
    Delete,
    Patch,
}

#[derive(Debug, Clone)]
struct Change<K> {
    old: Option<K>,
    new: Option<K>,
}

#[derive(Debug)]
struct Inner<K> {
    objects: BTreeMap<ObjectKey, K>,
    last_version: u64,
    failures: HashSet<(Operation, String)>,
}

/// In-process object store
#[derive(Debug, Clone)]
pub struct MemoryStore<K> {
    inner: Arc<Mutex<Inner<K>>>,
    changes: broadcast::Sender<Change<K>>,
}

impl<K> Default for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Apply a JSON merge patch (RFC 7386) in place
pub fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match patch {
        serde_json::Value::Object(patch_map) => {
            if !target.is_object() {
                *target = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(target_map) = target {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(key);
                    } else {
                        merge_patch(
                            target_map
                                .entry(key.clone())
                                .or_insert(serde_json::Value::Null),
                            value,
                        );
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                objects: BTreeMap::new(),
                last_version: 0,
                failures: HashSet::new(),
            })),
            changes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K>> {
        // A poisoned lock only means a test panicked mid-write; the map is still usable.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert an object as-is, keeping its version token when it has one
    pub fn seed(&self, mut obj: K) -> K {
        let mut inner = self.lock();
        let token = obj
            .meta()
            .resource_version
            .as_deref()
            .and_then(|rv| rv.parse::<u64>().ok());
        let token = match token {
            Some(t) => {
                inner.last_version = inner.last_version.max(t);
                t
            }
            None => {
                inner.last_version += 1;
                inner.last_version
            }
        };
        obj.meta_mut().resource_version = Some(token.to_string());
        let key = ObjectKey::of(&obj);
        let old = inner.objects.insert(key, obj.clone());
        drop(inner);
        self.notify(old, Some(obj.clone()));
        obj
    }

    /// Every object currently stored
    #[must_use]
    pub fn snapshot(&self) -> Vec<K> {
        self.lock().objects.values().cloned().collect()
    }

    /// Make the next calls of `op` on `name` fail with a transient error
    pub fn fail_on(&self, op: Operation, name: &str) {
        self.lock().failures.insert((op, name.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    fn check_failure(inner: &Inner<K>, op: Operation, name: &str) -> Result<(), StoreError> {
        if inner.failures.contains(&(op, name.to_string())) {
            return Err(StoreError::Transient(format!(
                "injected {op:?} failure for {name}"
            )));
        }
        Ok(())
    }

    fn notify(&self, old: Option<K>, new: Option<K>) {
        // No receivers is fine: nobody is watching.
        let _ = self.changes.send(Change { old, new });
    }

    fn bump(inner: &mut Inner<K>, obj: &mut K) {
        inner.last_version += 1;
        obj.meta_mut().resource_version = Some(inner.last_version.to_string());
    }

    fn patched(obj: &K, patch: &serde_json::Value) -> Result<K, StoreError> {
        let mut value =
            serde_json::to_value(obj).map_err(|e| StoreError::Decode(e.to_string()))?;
        merge_patch(&mut value, patch);
        serde_json::from_value(value).map_err(|e| StoreError::Decode(e.to_string()))
    }

    fn apply_patch(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        let mut inner = self.lock();
        Self::check_failure(&inner, Operation::Patch, &key.name)?;
        let current = inner.objects.get(key).cloned().ok_or(StoreError::NotFound)?;
        let mut updated = Self::patched(&current, patch)?;
        Self::bump(&mut inner, &mut updated);
        if is_released(&updated) {
            // Last finalizer of a terminating object gone: the object disappears.
            inner.objects.remove(key);
            drop(inner);
            self.notify(Some(current), None);
            return Ok(updated);
        }
        inner.objects.insert(key.clone(), updated.clone());
        drop(inner);
        self.notify(Some(current), Some(updated.clone()));
        Ok(updated)
    }
}

fn is_released<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
        && obj.meta().finalizers.as_ref().is_none_or(Vec::is_empty)
}

fn matches<K: Resource>(selector: &LabelSelector, obj: &K) -> bool {
    selector.matches(obj.meta().labels.as_ref())
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let inner = self.lock();
        Self::check_failure(&inner, Operation::Get, &key.name)?;
        Ok(inner.objects.get(key).cloned())
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        let selector = LabelSelector::parse(selector.unwrap_or_default());
        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .filter(|(_, obj)| matches(&selector, *obj))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    fn watch(&self, selector: Option<&str>) -> WatchStream<K> {
        let selector = LabelSelector::parse(selector.unwrap_or_default());
        // Subscribe before taking the snapshot so no change falls in between.
        let receiver = self.changes.subscribe();
        let initial: Vec<K> = self
            .lock()
            .objects
            .values()
            .filter(|obj| matches(&selector, *obj))
            .cloned()
            .collect();

        let listing = std::iter::once(watcher::Event::Init)
            .chain(initial.into_iter().map(watcher::Event::InitApply))
            .chain(std::iter::once(watcher::Event::InitDone))
            .map(Ok);

        let changes = futures::stream::unfold(
            (receiver, selector),
            |(mut receiver, selector)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(Change { old, new }) => {
                            let was = old.as_ref().is_some_and(|o| matches(&selector, o));
                            let event = match new {
                                Some(obj) if matches(&selector, &obj) => {
                                    Some(watcher::Event::Apply(obj))
                                }
                                Some(obj) if was => Some(watcher::Event::Delete(obj)),
                                None if was => old.map(watcher::Event::Delete),
                                _ => None,
                            };
                            if let Some(event) = event {
                                return Some((Ok(event), (receiver, selector)));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            return Some((
                                Err(StoreError::Transient(format!(
                                    "watch fell behind by {missed} events"
                                ))),
                                (receiver, selector),
                            ));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        );

        futures::stream::iter(listing).chain(changes).boxed()
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        let mut inner = self.lock();
        Self::check_failure(&inner, Operation::Create, &key.name)?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        let mut created = obj.clone();
        Self::bump(&mut inner, &mut created);
        inner.objects.insert(key, created.clone());
        drop(inner);
        self.notify(None, Some(created.clone()));
        Ok(created)
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj);
        let mut inner = self.lock();
        Self::check_failure(&inner, Operation::Replace, &key.name)?;
        let current = inner.objects.get(&key).cloned().ok_or(StoreError::NotFound)?;
        if obj.meta().resource_version.is_some()
            && obj.meta().resource_version != current.meta().resource_version
        {
            return Err(StoreError::Conflict);
        }
        let mut replaced = obj.clone();
        Self::bump(&mut inner, &mut replaced);
        inner.objects.insert(key, replaced.clone());
        drop(inner);
        self.notify(Some(current), Some(replaced.clone()));
        Ok(replaced)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::check_failure(&inner, Operation::Delete, &key.name)?;
        let current = inner.objects.get(key).cloned().ok_or(StoreError::NotFound)?;
        let has_finalizers = current
            .meta()
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            if current.meta().deletion_timestamp.is_some() {
                return Ok(());
            }
            // Finalizers hold the object back: mark it terminating instead.
            let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            let mut terminating = Self::patched(
                &current,
                &serde_json::json!({ "metadata": { "deletionTimestamp": now } }),
            )?;
            Self::bump(&mut inner, &mut terminating);
            inner.objects.insert(key.clone(), terminating.clone());
            drop(inner);
            self.notify(Some(current), Some(terminating));
            return Ok(());
        }
        inner.objects.remove(key);
        drop(inner);
        self.notify(Some(current), None);
        Ok(())
    }

    async fn patch_metadata(
        &self,
        key: &ObjectKey,
        patch: &MetadataPatch,
    ) -> Result<K, StoreError> {
        self.apply_patch(key, &patch.to_merge_patch())
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: serde_json::Value,
    ) -> Result<K, StoreError> {
        self.apply_patch(key, &serde_json::json!({ "status": status }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let store = MemoryStore::new();
        store.create(&config_map("a", &[])).await.unwrap();
        let err = store.create(&config_map("a", &[])).await.unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists);
    }

    #[tokio::test]
    async fn replace_with_stale_token_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("a", &[])).await.unwrap();
        let updated = store.replace(&created).await.unwrap();
        assert_ne!(created.metadata.resource_version, updated.metadata.resource_version);
        assert_eq!(store.replace(&created).await.unwrap_err(), StoreError::Conflict);
    }

    #[tokio::test]
    async fn metadata_patch_adds_and_removes_labels() {
        let store = MemoryStore::new();
        store.create(&config_map("a", &[("keep", "1"), ("drop", "1")])).await.unwrap();
        let key = ObjectKey::namespaced("default", "a");
        let patch = MetadataPatch::default()
            .label("drop", None)
            .label("added", Some("yes"));
        let patched = store.patch_metadata(&key, &patch).await.unwrap();
        let labels = patched.metadata.labels.unwrap();
        assert_eq!(labels.get("keep").map(String::as_str), Some("1"));
        assert_eq!(labels.get("added").map(String::as_str), Some("yes"));
        assert!(!labels.contains_key("drop"));
    }

    #[tokio::test]
    async fn seeded_token_is_kept_and_next_write_continues_from_it() {
        let store = MemoryStore::new();
        let mut cm = config_map("a", &[]);
        cm.metadata.resource_version = Some("104".to_string());
        let seeded = store.seed(cm);
        let replaced = store.replace(&seeded).await.unwrap();
        assert_eq!(replaced.metadata.resource_version.as_deref(), Some("105"));
    }

    #[tokio::test]
    async fn watch_lists_then_streams_selector_transitions() {
        let store = MemoryStore::new();
        store.seed(config_map("watched", &[("w", "true")]));
        store.seed(config_map("other", &[]));
        let mut stream = store.watch(Some("w"));

        assert!(matches!(stream.next().await, Some(Ok(watcher::Event::Init))));
        match stream.next().await {
            Some(Ok(watcher::Event::InitApply(cm))) => {
                assert_eq!(cm.metadata.name.as_deref(), Some("watched"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(stream.next().await, Some(Ok(watcher::Event::InitDone))));

        let key = ObjectKey::namespaced("default", "watched");
        store
            .patch_metadata(&key, &MetadataPatch::default().label("w", None))
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(Ok(watcher::Event::Delete(_)))));
    }

    #[tokio::test]
    async fn delete_waits_for_finalizers() {
        let store = MemoryStore::new();
        let mut cm = config_map("guarded", &[]);
        cm.metadata.finalizers = Some(vec!["example.com/guard".to_string()]);
        store.create(&cm).await.unwrap();
        let key = ObjectKey::namespaced("default", "guarded");

        store.delete(&key).await.unwrap();
        let terminating = store.get(&key).await.unwrap().unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());

        store
            .patch_metadata(&key, &MetadataPatch::default().finalizers(Vec::new()))
            .await
            .unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let store = MemoryStore::new();
        store.fail_on(Operation::Create, "a");
        let err = store.create(&config_map("a", &[])).await.unwrap_err();
        assert!(err.is_transient());
        store.clear_failures();
        assert!(store.create(&config_map("a", &[])).await.is_ok());
    }
}
