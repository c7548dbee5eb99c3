//! # Repository Index
//!
//! Downloads `{url}/index.yaml` from a Catalog's repositories and the
//! optional per-entry metadata documents.
//!
//! Repositories are tried in order; the first one that answers wins. Each
//! repository gets `http_retries` retries with Fibonacci backoff. Metadata
//! downloads are best-effort and never retried.

use crate::config::SharedControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::ReconcilerError;
use crate::crd::EntryRestrictions;
use crate::observability::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};

/// Parsed `index.yaml`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RepoIndex {
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<IndexEntry>>,
}

/// One chart version in a repository index
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub api_version: String,
    /// RFC3339 creation time
    #[serde(default)]
    pub created: Option<String>,
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
    pub annotations: BTreeMap<String, String>,
}

/// Per-entry metadata document
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub chart_api_version: String,
    #[serde(default)]
    pub data_created: Option<String>,
    #[serde(default)]
    pub restrictions: Option<EntryRestrictions>,
    #[serde(default)]
    pub upstream_chart_version: String,
}

/// Source of repository indexes and metadata documents
#[async_trait]
pub trait IndexSource: Send + Sync + std::fmt::Debug {
    /// Index of the first repository that answers
    async fn fetch_index(&self, urls: &[String]) -> Result<RepoIndex, ReconcilerError>;

    async fn fetch_metadata(&self, url: &str) -> Result<EntryMetadata, ReconcilerError>;
}

/// URL of the index document of a repository
#[must_use]
pub fn index_url(repository: &str) -> String {
    format!("{}/index.yaml", repository.trim_end_matches('/'))
}

/// Index source over HTTP
#[derive(Debug, Clone)]
pub struct HttpIndexSource {
    client: reqwest::Client,
    retries: u32,
}

impl HttpIndexSource {
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(timeout: Duration, retries: u32) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client, retries })
    }

    /// Build from the shared controller configuration
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built.
    pub async fn from_config(config: &SharedControllerConfig) -> anyhow::Result<Self> {
        let config = config.read().await;
        Self::new(config.http_timeout(), config.http_retries)
    }

    async fn get_text(&self, url: &str) -> Result<String, ReconcilerError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ReconcilerError::Fetch(format!("GET {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReconcilerError::Fetch(format!("GET {url}: HTTP {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| ReconcilerError::Fetch(format!("GET {url}: {e}")))
    }

    async fn fetch_one(&self, repository: &str) -> Result<RepoIndex, ReconcilerError> {
        let url = index_url(repository);
        let mut backoff = FibonacciBackoff::for_http_retries();
        let mut attempt = 0;
        loop {
            let result = self.get_text(&url).await.and_then(|body| {
                serde_yaml::from_str::<RepoIndex>(&body)
                    .map_err(|e| ReconcilerError::Fetch(format!("{url}: invalid index: {e}")))
            });
            match result {
                Ok(index) => return Ok(index),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    let delay = backoff.next_backoff();
                    warn!(
                        url = url.as_str(),
                        attempt,
                        error = %e,
                        "Index download failed, retrying in {}s",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl IndexSource for HttpIndexSource {
    async fn fetch_index(&self, urls: &[String]) -> Result<RepoIndex, ReconcilerError> {
        let mut last_error = None;
        for repository in urls {
            let span = info_span!("catalog.index.fetch", url = repository.as_str());
            match self.fetch_one(repository).instrument(span).await {
                Ok(index) => {
                    metrics::increment_index_fetch("success");
                    debug!(url = repository.as_str(), charts = index.entries.len(), "Fetched index");
                    return Ok(index);
                }
                Err(e) => {
                    metrics::increment_index_fetch("error");
                    warn!(url = repository.as_str(), error = %e, "Repository unavailable");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| ReconcilerError::Fetch("catalog has no repositories".to_string())))
    }

    async fn fetch_metadata(&self, url: &str) -> Result<EntryMetadata, ReconcilerError> {
        let body = self.get_text(url).await?;
        serde_yaml::from_str(&body)
            .map_err(|e| ReconcilerError::Fetch(format!("{url}: invalid metadata: {e}")))
    }
}

/// Fixed documents keyed by URL
#[derive(Debug, Default)]
pub struct StaticIndexSource {
    pub indexes: BTreeMap<String, RepoIndex>,
    pub metadata: BTreeMap<String, EntryMetadata>,
}

#[async_trait]
impl IndexSource for StaticIndexSource {
    async fn fetch_index(&self, urls: &[String]) -> Result<RepoIndex, ReconcilerError> {
        urls.iter()
            .find_map(|url| self.indexes.get(url).cloned())
            .ok_or_else(|| ReconcilerError::Fetch(format!("no index for {urls:?}")))
    }

    async fn fetch_metadata(&self, url: &str) -> Result<EntryMetadata, ReconcilerError> {
        self.metadata
            .get(url)
            .cloned()
            .ok_or_else(|| ReconcilerError::Fetch(format!("no metadata at {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_url_ignores_trailing_slash() {
        assert_eq!(index_url("https://charts.example.com/stable/"), "https://charts.example.com/stable/index.yaml");
        assert_eq!(index_url("https://charts.example.com"), "https://charts.example.com/index.yaml");
    }

    #[test]
    fn parses_repository_index() {
        let raw = r"
apiVersion: v1
entries:
  ingress-nginx:
    - name: ingress-nginx
      version: 4.10.0
      appVersion: 1.10.0
      apiVersion: v2
      created: 2024-03-01T10:00:00Z
      urls:
        - ingress-nginx-4.10.0.tgz
      annotations:
        application.octopilot.io/metadata-url: https://charts.example.com/ingress-nginx-4.10.0.meta
";
        let index: RepoIndex = serde_yaml::from_str(raw).unwrap();
        let versions = &index.entries["ingress-nginx"];
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].app_version, "1.10.0");
        assert_eq!(versions[0].created.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert_eq!(versions[0].annotations.len(), 1);
    }

    #[test]
    fn parses_metadata_document() {
        let raw = r"
chartApiVersion: v2
dataCreated: 2024-03-02T00:00:00Z
upstreamChartVersion: 4.10.0
restrictions:
  clusterSingleton: true
  compatibleProviders: [aws]
";
        let meta: EntryMetadata = serde_yaml::from_str(raw).unwrap();
        assert_eq!(meta.chart_api_version, "v2");
        let restrictions = meta.restrictions.unwrap();
        assert!(restrictions.cluster_singleton);
        assert_eq!(restrictions.compatible_providers, vec!["aws".to_string()]);
    }

    #[tokio::test]
    async fn static_source_takes_first_known_url() {
        let source = StaticIndexSource {
            indexes: BTreeMap::from([("https://b".to_string(), RepoIndex::default())]),
            metadata: BTreeMap::new(),
        };
        let urls = vec!["https://a".to_string(), "https://b".to_string()];
        assert!(source.fetch_index(&urls).await.is_ok());
        assert!(source.fetch_index(&urls[..1]).await.is_err());
    }
}
