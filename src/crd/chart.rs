//! # Chart
//!
//! Release intent derived from an App. The operator writes the spec every
//! pass; an external installer owns the status.

use serde::{Deserialize, Serialize};

/// Chart Custom Resource Definition
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[kube(
    kind = "Chart",
    group = "application.octopilot.io",
    version = "v1alpha1",
    namespaced,
    status = "ChartStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}, {"name":"Status", "type":"string", "jsonPath":".status.release.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Release name
    pub name: String,
    /// Namespace the release is installed into
    pub namespace: String,
    /// Chart version
    pub version: String,
    /// Location of the packaged chart
    pub tarball_url: String,
    /// Merged values objects
    #[serde(default)]
    pub config: ChartConfig,
}

/// Values objects consumed by the installer
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(default)]
    pub config_map: Option<ChartValuesRef>,
    #[serde(default)]
    pub secret: Option<ChartValuesRef>,
}

/// Reference to a values object pinned to its version token, so that a
/// values change always changes the Chart spec
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartValuesRef {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub resource_version: String,
}

/// Status written by the installer
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartStatus {
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub release: ChartReleaseStatus,
}

/// Release state of an installed chart
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartReleaseStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub last_deployed: Option<String>,
    #[serde(default)]
    pub revision: Option<i64>,
}
