//! # App
//!
//! Deployment intent: which chart, from which catalog, into which namespace
//! of which cluster, with which values.

use serde::{Deserialize, Serialize};

/// App Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: application.octopilot.io/v1alpha1
/// kind: App
/// metadata:
///   name: ingress
///   namespace: org-acme
/// spec:
///   name: ingress-nginx
///   version: 4.10.0
///   catalog: stable
///   namespace: ingress
///   kubeConfig:
///     inCluster: true
///   userConfig:
///     configMap:
///       name: ingress-user-values
///       namespace: org-acme
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "App",
    group = "application.octopilot.io",
    version = "v1alpha1",
    namespaced,
    status = "AppStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}, {"name":"Status", "type":"string", "jsonPath":".status.release.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Chart name in the catalog
    pub name: String,
    /// Chart version to install
    pub version: String,
    /// Catalog providing the chart
    pub catalog: String,
    /// Namespace of the catalog; defaults to the operator's default catalog namespace
    #[serde(default)]
    pub catalog_namespace: Option<String>,
    /// Namespace the release is installed into
    pub namespace: String,
    /// Target cluster credentials
    #[serde(default)]
    pub kube_config: KubeConfig,
    /// Values provided by the App author
    #[serde(default)]
    pub config: Option<ValuesConfig>,
    /// Values overriding everything else
    #[serde(default)]
    pub user_config: Option<ValuesConfig>,
}

/// Target cluster selection
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeConfig {
    /// Install into the cluster the operator runs in
    #[serde(default = "crate::crd::default_true")]
    pub in_cluster: bool,
    /// Secret holding a kubeconfig under the `kubeConfig` key
    #[serde(default)]
    pub secret: Option<ObjectRef>,
    /// Kubeconfig context to use
    #[serde(default)]
    pub context: Option<KubeConfigContext>,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            in_cluster: true,
            secret: None,
            context: None,
        }
    }
}

/// Kubeconfig context selection
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeConfigContext {
    pub name: String,
}

/// Reference to a namespaced object
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub name: String,
    pub namespace: String,
}

/// Values sources: a ConfigMap and/or a Secret, each with YAML under `values`
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValuesConfig {
    #[serde(default)]
    pub config_map: Option<ObjectRef>,
    #[serde(default)]
    pub secret: Option<ObjectRef>,
}

/// Status of the App resource, mirrored from its Chart
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    /// Version of the application shipped by the chart
    #[serde(default)]
    pub app_version: String,
    /// Installed chart version
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub release: ReleaseStatus,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Release state reported by the installer
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: String,
    /// RFC3339 time of the last deployment
    #[serde(default)]
    pub last_deployed: Option<String>,
}

impl App {
    /// Catalog namespace, falling back to the given default
    #[must_use]
    pub fn catalog_namespace<'a>(&'a self, default: &'a str) -> &'a str {
        self.spec
            .catalog_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default)
    }
}
