//! # Target Cluster
//!
//! Resolves the cluster an App installs into. In-cluster Apps reuse the
//! operator's client; other Apps carry a kubeconfig in a Secret.

use crate::constants::KUBECONFIG_KEY;
use crate::controller::reconciler::types::StageError;
use crate::crd::{App, Chart};
use crate::store::{KubeClusterStore, KubeStore, ObjectKey, ObjectStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::sync::Arc;
use tracing::debug;

/// Stores of one target cluster
#[derive(Clone)]
pub struct TargetStores {
    pub namespaces: Arc<dyn ObjectStore<Namespace>>,
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub charts: Arc<dyn ObjectStore<Chart>>,
    /// Whether the stores talk to a cluster other than the operator's
    pub remote: bool,
}

impl std::fmt::Debug for TargetStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetStores")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl TargetStores {
    #[must_use]
    pub fn from_client(client: &Client, remote: bool) -> Self {
        Self {
            namespaces: Arc::new(KubeClusterStore::<Namespace>::new(client.clone())),
            config_maps: Arc::new(KubeStore::<ConfigMap>::new(client.clone())),
            secrets: Arc::new(KubeStore::<Secret>::new(client.clone())),
            charts: Arc::new(KubeStore::<Chart>::new(client.clone())),
            remote,
        }
    }

    /// Map a store error from this cluster to a stage error. An unreachable
    /// remote cluster cancels the pass instead of failing it.
    pub fn stage_error(&self, error: StoreError) -> StageError {
        if self.remote && error.is_transient() {
            StageError::Cancel(format!("target cluster unreachable: {error}"))
        } else {
            error.into()
        }
    }
}

/// Hands out target-cluster stores for an App
#[async_trait]
pub trait TargetResolver: Send + Sync + std::fmt::Debug {
    async fn stores_for(&self, app: &App) -> Result<TargetStores, StageError>;
}

/// Resolver backed by real clusters
pub struct KubeTargetResolver {
    local: TargetStores,
    secrets: Arc<dyn ObjectStore<Secret>>,
}

impl std::fmt::Debug for KubeTargetResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTargetResolver").finish_non_exhaustive()
    }
}

impl KubeTargetResolver {
    /// `secrets` reads kubeconfig Secrets in the operator's cluster
    #[must_use]
    pub fn new(client: &Client, secrets: Arc<dyn ObjectStore<Secret>>) -> Self {
        Self {
            local: TargetStores::from_client(client, false),
            secrets,
        }
    }

    async fn remote_client(&self, app: &App) -> Result<Client, StageError> {
        let Some(secret_ref) = app.spec.kube_config.secret.as_ref() else {
            return Err(StageError::Cancel(
                "kubeConfig.inCluster is false but no kubeconfig secret is set".to_string(),
            ));
        };
        let key = ObjectKey::namespaced(&secret_ref.namespace, &secret_ref.name);
        let secret = self
            .secrets
            .get(&key)
            .await?
            .ok_or_else(|| StageError::Cancel(format!("kubeconfig secret {key} not found")))?;
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_KEY))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
            .ok_or_else(|| {
                StageError::Cancel(format!("kubeconfig secret {key} has no {KUBECONFIG_KEY} key"))
            })?;

        let kubeconfig = Kubeconfig::from_yaml(&raw)
            .map_err(|e| StageError::Cancel(format!("invalid kubeconfig in {key}: {e}")))?;
        let options = KubeConfigOptions {
            context: app.spec.kube_config.context.as_ref().map(|c| c.name.clone()),
            ..KubeConfigOptions::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| StageError::Cancel(format!("unusable kubeconfig in {key}: {e}")))?;
        Client::try_from(config)
            .map_err(|e| StageError::Cancel(format!("cannot build client from {key}: {e}")))
    }
}

#[async_trait]
impl TargetResolver for KubeTargetResolver {
    async fn stores_for(&self, app: &App) -> Result<TargetStores, StageError> {
        if app.spec.kube_config.in_cluster {
            return Ok(self.local.clone());
        }
        let client = self.remote_client(app).await?;
        debug!(
            resource.name = app.metadata.name.as_deref().unwrap_or("unknown"),
            "Resolved remote target cluster"
        );
        Ok(TargetStores::from_client(&client, true))
    }
}

/// Resolver returning the same stores for every App
#[derive(Debug, Clone)]
pub struct StaticTargetResolver {
    stores: TargetStores,
}

impl StaticTargetResolver {
    #[must_use]
    pub fn new(stores: TargetStores) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl TargetResolver for StaticTargetResolver {
    async fn stores_for(&self, _app: &App) -> Result<TargetStores, StageError> {
        Ok(self.stores.clone())
    }
}
