//! # Object Store
//!
//! Narrow, watchable, optimistically-concurrent object API the reconciliation
//! core is written against.
//!
//! - `api`: implementation backed by `kube::Api`
//! - `memory`: in-process implementation with the same semantics (version
//!   tokens, label selectors, watch streams), used by tests
//! - `selector`: label selector parsing and matching
//!
//! Every write bumps the object's version token (`metadata.resourceVersion`).
//! `replace` requires the caller's token to match the stored one.

pub mod api;
pub mod memory;
pub mod selector;

pub use api::{KubeClusterStore, KubeStore};
pub use memory::MemoryStore;

use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::{Resource, ResourceExt};
use kube_runtime::watcher;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors returned by an [`ObjectStore`]
///
/// `NotFound` and `AlreadyExists` are sentinels callers branch on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    AlreadyExists,
    #[error("version token conflict")]
    Conflict,
    /// Network errors, throttling, server-side failures
    #[error("transient store error: {0}")]
    Transient(String),
    /// The store returned something that is not the expected kind
    #[error("unexpected object shape: {0}")]
    Decode(String),
    /// The store refused the request (validation, permissions)
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether retrying the same call later can succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Conflict)
    }
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(ref resp) if resp.code == 404 => StoreError::NotFound,
            kube::Error::Api(ref resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                StoreError::AlreadyExists
            }
            kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict,
            kube::Error::Api(ref resp) if resp.code == 429 || resp.code >= 500 => {
                StoreError::Transient(resp.message.clone())
            }
            kube::Error::Api(ref resp) => StoreError::Rejected(resp.message.clone()),
            kube::Error::SerdeError(e) => StoreError::Decode(e.to_string()),
            other => StoreError::Transient(other.to_string()),
        }
    }
}

impl From<watcher::Error> for StoreError {
    fn from(error: watcher::Error) -> Self {
        StoreError::Transient(error.to_string())
    }
}

/// Identity of an object: namespace (absent for cluster-scoped kinds) and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Label/annotation changes; `None` removes the key. `finalizers`, when
/// set, replaces the whole list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub labels: BTreeMap<String, Option<String>>,
    pub annotations: BTreeMap<String, Option<String>>,
    pub finalizers: Option<Vec<String>>,
}

impl MetadataPatch {
    #[must_use]
    pub fn label(mut self, key: &str, value: Option<&str>) -> Self {
        self.labels.insert(key.to_string(), value.map(str::to_string));
        self
    }

    #[must_use]
    pub fn annotation(mut self, key: &str, value: Option<&str>) -> Self {
        self.annotations
            .insert(key.to_string(), value.map(str::to_string));
        self
    }

    #[must_use]
    pub fn finalizers(mut self, finalizers: Vec<String>) -> Self {
        self.finalizers = Some(finalizers);
        self
    }

    /// JSON merge patch document for this change
    #[must_use]
    pub fn to_merge_patch(&self) -> serde_json::Value {
        let mut metadata = serde_json::Map::new();
        if !self.labels.is_empty() {
            metadata.insert("labels".to_string(), serde_json::json!(self.labels));
        }
        if !self.annotations.is_empty() {
            metadata.insert("annotations".to_string(), serde_json::json!(self.annotations));
        }
        if let Some(finalizers) = &self.finalizers {
            metadata.insert("finalizers".to_string(), serde_json::json!(finalizers));
        }
        serde_json::json!({ "metadata": metadata })
    }
}

/// Watch stream of one kind, in kube-runtime watcher event form
pub type WatchStream<K> = BoxStream<'static, Result<watcher::Event<K>, StoreError>>;

/// Watchable object API for one kind
#[async_trait]
pub trait ObjectStore<K>: Send + Sync + fmt::Debug
where
    K: Clone + Send + Sync + 'static,
{
    /// Fetch one object; `Ok(None)` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    /// List objects, optionally restricted to a namespace and a label selector
    async fn list(&self, namespace: Option<&str>, selector: Option<&str>)
        -> Result<Vec<K>, StoreError>;

    /// Stream changes for objects matching the selector across all namespaces
    fn watch(&self, selector: Option<&str>) -> WatchStream<K>;

    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace an object; its version token must match the stored one
    async fn replace(&self, obj: &K) -> Result<K, StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    async fn patch_metadata(&self, key: &ObjectKey, patch: &MetadataPatch)
        -> Result<K, StoreError>;

    /// Merge the given status into the status subresource
    async fn patch_status(&self, key: &ObjectKey, status: serde_json::Value)
        -> Result<K, StoreError>;
}

/// Parse a version token as the integer the API server hands out
#[must_use]
pub fn version_token(meta: &kube::core::ObjectMeta) -> Option<u64> {
    meta.resource_version.as_deref().and_then(|rv| rv.parse().ok())
}
