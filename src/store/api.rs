//! # Kubernetes-backed Store
//!
//! [`ObjectStore`] over `kube::Api`. `KubeStore` serves namespaced kinds,
//! `KubeClusterStore` cluster-scoped kinds such as `Namespace`.

use super::{MetadataPatch, ObjectKey, ObjectStore, StoreError, WatchStream};
use crate::constants::OPERATOR_NAME;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;

/// Store for a namespaced kind
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

/// Store for a cluster-scoped kind
pub struct KubeClusterStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeClusterStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> std::fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("kind", &std::any::type_name::<K>())
            .finish_non_exhaustive()
    }
}

impl<K> std::fmt::Debug for KubeClusterStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterStore")
            .field("kind", &std::any::type_name::<K>())
            .finish_non_exhaustive()
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    fn api(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn api_for(&self, key: &ObjectKey) -> Result<Api<K>, StoreError> {
        key.namespace
            .as_deref()
            .map(|ns| Api::namespaced(self.client.clone(), ns))
            .ok_or_else(|| StoreError::Rejected(format!("{key} has no namespace")))
    }
}

impl<K> KubeClusterStore<K>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
{
    fn api(&self) -> Api<K> {
        Api::all(self.client.clone())
    }
}

fn selector_params(selector: Option<&str>) -> ListParams {
    match selector {
        Some(s) if !s.is_empty() => ListParams::default().labels(s),
        _ => ListParams::default(),
    }
}

fn watch_config(selector: Option<&str>) -> watcher::Config {
    match selector {
        Some(s) if !s.is_empty() => watcher::Config::default().labels(s),
        _ => watcher::Config::default(),
    }
}

async fn get_in<K>(api: Api<K>, name: &str) -> Result<Option<K>, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

async fn create_in<K>(api: Api<K>, obj: &K) -> Result<K, StoreError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    Ok(api.create(&PostParams::default(), obj).await?)
}

async fn replace_in<K>(api: Api<K>, obj: &K) -> Result<K, StoreError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::Rejected("object has no name".to_string()))?;
    Ok(api.replace(&name, &PostParams::default(), obj).await?)
}

async fn delete_in<K>(api: Api<K>, name: &str) -> Result<(), StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default()).await?;
    Ok(())
}

async fn patch_in<K>(api: Api<K>, name: &str, patch: &serde_json::Value) -> Result<K, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api
        .patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?)
}

async fn patch_status_in<K>(
    api: Api<K>,
    name: &str,
    status: serde_json::Value,
) -> Result<K, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = serde_json::json!({ "status": status });
    Ok(api
        .patch_status(name, &PatchParams::apply(OPERATOR_NAME), &Patch::Merge(&patch))
        .await?)
}

fn watch_api<K>(api: Api<K>, selector: Option<&str>) -> WatchStream<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    watcher(api, watch_config(selector))
        .map_err(StoreError::from)
        .boxed()
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        get_in(self.api_for(key)?, &key.name).await
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        Ok(self
            .api(namespace)
            .list(&selector_params(selector))
            .await?
            .items)
    }

    fn watch(&self, selector: Option<&str>) -> WatchStream<K> {
        watch_api(self.api(None), selector)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        create_in(self.api_for(&ObjectKey::of(obj))?, obj).await
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        replace_in(self.api_for(&ObjectKey::of(obj))?, obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        delete_in(self.api_for(key)?, &key.name).await
    }

    async fn patch_metadata(
        &self,
        key: &ObjectKey,
        patch: &MetadataPatch,
    ) -> Result<K, StoreError> {
        patch_in(self.api_for(key)?, &key.name, &patch.to_merge_patch()).await
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: serde_json::Value,
    ) -> Result<K, StoreError> {
        patch_status_in(self.api_for(key)?, &key.name, status).await
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeClusterStore<K>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        get_in(self.api(), &key.name).await
    }

    async fn list(
        &self,
        _namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        Ok(self.api().list(&selector_params(selector)).await?.items)
    }

    fn watch(&self, selector: Option<&str>) -> WatchStream<K> {
        watch_api(self.api(), selector)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        create_in(self.api(), obj).await
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        replace_in(self.api(), obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        delete_in(self.api(), &key.name).await
    }

    async fn patch_metadata(
        &self,
        key: &ObjectKey,
        patch: &MetadataPatch,
    ) -> Result<K, StoreError> {
        patch_in(self.api(), &key.name, &patch.to_merge_patch()).await
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: serde_json::Value,
    ) -> Result<K, StoreError> {
        patch_status_in(self.api(), &key.name, status).await
    }
}
