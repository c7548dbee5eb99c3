//! # Catalog
//!
//! A set of chart repositories. Each Catalog drives many AppCatalogEntry
//! objects, one per (chart, version) kept by the deriver.

use serde::{Deserialize, Serialize};

/// Catalog Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: application.octopilot.io/v1alpha1
/// kind: Catalog
/// metadata:
///   name: stable
///   namespace: default
///   labels:
///     application.octopilot.io/catalog-type: stable
/// spec:
///   title: Stable
///   storage:
///     type: helm
///     url: https://charts.example.com/stable/
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Catalog",
    group = "application.octopilot.io",
    version = "v1alpha1",
    namespaced,
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".spec.storage.url"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSpec {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    /// Primary repository
    #[serde(default)]
    pub storage: Option<CatalogRepository>,
    /// Additional repositories, tried in order after `storage`
    #[serde(default)]
    pub repositories: Vec<CatalogRepository>,
    /// Catalog-level values merged under every App of this catalog
    #[serde(default)]
    pub config: Option<crate::crd::ValuesConfig>,
}

/// Chart repository location
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRepository {
    /// Repository type, `helm` or `oci`
    #[serde(default = "default_repository_type")]
    pub r#type: String,
    pub url: String,
}

fn default_repository_type() -> String {
    "helm".to_string()
}

impl Catalog {
    /// Repository URLs in priority order, without duplicates
    #[must_use]
    pub fn storage_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for repo in self.spec.storage.iter().chain(self.spec.repositories.iter()) {
            let url = repo.url.trim().to_string();
            if !url.is_empty() && !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }

    /// Community catalogs are never expanded into entries
    #[must_use]
    pub fn is_community(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(crate::constants::LABEL_CATALOG_TYPE))
            .is_some_and(|t| t == crate::constants::CATALOG_TYPE_COMMUNITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn repo(url: &str) -> CatalogRepository {
        CatalogRepository {
            r#type: "helm".to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn storage_urls_are_ordered_and_deduplicated() {
        let catalog = Catalog::new(
            "stable",
            CatalogSpec {
                storage: Some(repo("https://a.example.com/")),
                repositories: vec![repo("https://a.example.com/"), repo("https://b.example.com/")],
                ..CatalogSpec::default()
            },
        );
        assert_eq!(
            catalog.storage_urls(),
            vec!["https://a.example.com/".to_string(), "https://b.example.com/".to_string()]
        );
    }

    #[test]
    fn community_label_is_detected() {
        let mut catalog = Catalog::new("helm-stable", CatalogSpec::default());
        assert!(!catalog.is_community());
        catalog.metadata.labels = Some(BTreeMap::from([(
            crate::constants::LABEL_CATALOG_TYPE.to_string(),
            "community".to_string(),
        )]));
        assert!(catalog.is_community());
    }
}
