//! # AppCatalogEntry
//!
//! One chart version published by a Catalog.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// AppCatalogEntry Custom Resource Definition
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[kube(
    kind = "AppCatalogEntry",
    group = "application.octopilot.io",
    version = "v1alpha1",
    namespaced,
    shortname = "ace",
    printcolumn = r#"{"name":"App", "type":"string", "jsonPath":".spec.appName"}, {"name":"Version", "type":"string", "jsonPath":".spec.version"}, {"name":"Latest", "type":"string", "jsonPath":".metadata.labels.latest"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppCatalogEntrySpec {
    /// Chart name
    pub app_name: String,
    /// Version of the packaged application
    #[serde(default)]
    pub app_version: String,
    /// Chart version
    pub version: String,
    pub catalog: crate::crd::ObjectRef,
    pub chart: EntryChart,
    /// RFC3339 creation time from the repository index
    #[serde(default)]
    pub date_created: Option<String>,
    /// RFC3339 time the entry was last derived from changed data
    #[serde(default)]
    pub date_updated: Option<String>,
    #[serde(default)]
    pub restrictions: Option<EntryRestrictions>,
}

/// Chart metadata copied from the repository index and metadata document
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntryChart {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub home: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub upstream_chart_version: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Installation restrictions published in the metadata document
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntryRestrictions {
    #[serde(default)]
    pub cluster_singleton: bool,
    #[serde(default)]
    pub fixed_namespace: Option<String>,
    #[serde(default)]
    pub namespace_singleton: bool,
    #[serde(default)]
    pub compatible_providers: Vec<String>,
}
