//! # Entry Derivation
//!
//! Turns the versions of one chart into the bounded set of AppCatalogEntry
//! objects a Catalog publishes.
//!
//! 1. Order versions by creation time, newest first
//! 2. Pick the latest by semantic version with pre-release and build
//!    qualifiers stripped (so `1.0.0-alpha` ranks equal to `1.0.0`); ties go
//!    to the later creation time
//! 3. Keep the `max` newest versions and pin the latest if it fell outside
//!
//! Versions that are not semantic versions are skipped with a warning.

use crate::constants::{
    LABEL_APP_NAME, LABEL_CATALOG_NAME, LABEL_LATEST, LABEL_MANAGED_BY, OPERATOR_NAME,
};
use crate::controller::catalog::index::{EntryMetadata, IndexEntry};
use crate::crd::{AppCatalogEntry, AppCatalogEntrySpec, Catalog, EntryChart, ObjectRef};
use chrono::{DateTime, Utc};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use regex::Regex;
use semver::{BuildMetadata, Prerelease, Version};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::warn;

/// Longest valid object name
const MAX_NAME_LEN: usize = 253;

static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9.-]+").expect("valid regex"));

/// A version kept for publication
#[derive(Debug, Clone, PartialEq)]
pub struct Selected {
    pub entry: IndexEntry,
    pub latest: bool,
}

/// Creation time of an index entry, if it parses
#[must_use]
pub fn created_at(entry: &IndexEntry) -> Option<DateTime<Utc>> {
    entry
        .created
        .as_deref()
        .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
        .map(|c| c.with_timezone(&Utc))
}

/// Semantic version with pre-release and build metadata removed
#[must_use]
pub fn normalized_version(version: &str) -> Option<Version> {
    let mut parsed = Version::parse(version.trim().trim_start_matches('v')).ok()?;
    parsed.pre = Prerelease::EMPTY;
    parsed.build = BuildMetadata::EMPTY;
    Some(parsed)
}

/// Newest first; entries without a creation time go last
fn by_created_desc(a: &IndexEntry, b: &IndexEntry) -> Ordering {
    created_at(b).cmp(&created_at(a))
}

/// Index of the latest version in `entries`
#[must_use]
pub fn latest_index(entries: &[(IndexEntry, Version)]) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .max_by(|(_, (a, va)), (_, (b, vb))| {
            va.cmp(vb).then_with(|| created_at(a).cmp(&created_at(b)))
        })
        .map(|(i, _)| i)
}

/// Versions of one chart to publish, newest first
#[must_use]
pub fn select_versions(chart: &str, entries: &[IndexEntry], max: usize) -> Vec<Selected> {
    let mut valid: Vec<(IndexEntry, Version)> = entries
        .iter()
        .filter_map(|entry| match normalized_version(&entry.version) {
            Some(version) => Some((entry.clone(), version)),
            None => {
                warn!(
                    chart,
                    version = entry.version.as_str(),
                    "Skipping entry with invalid semantic version"
                );
                None
            }
        })
        .collect();
    valid.sort_by(|(a, _), (b, _)| by_created_desc(a, b));

    let Some(latest) = latest_index(&valid) else {
        return Vec::new();
    };
    valid
        .into_iter()
        .enumerate()
        .filter(|(i, _)| *i < max || *i == latest)
        .map(|(i, (entry, _))| Selected {
            entry,
            latest: i == latest,
        })
        .collect()
}

/// DNS-1123 name of an entry: `{catalog}-{chart}-{version}`
#[must_use]
pub fn entry_name(catalog: &str, chart: &str, version: &str) -> String {
    let raw = format!("{catalog}-{chart}-{version}").to_lowercase();
    let mut name = INVALID_NAME_CHARS.replace_all(&raw, "-").into_owned();
    name.truncate(MAX_NAME_LEN);
    name.trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

fn is_latest(entry: &AppCatalogEntry) -> bool {
    entry.labels().get(LABEL_LATEST).is_some_and(|v| v == "true")
}

fn entry_created(entry: &AppCatalogEntry) -> Option<DateTime<Utc>> {
    entry
        .spec
        .date_created
        .as_deref()
        .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
        .map(|c| c.with_timezone(&Utc))
}

/// Collapse entries that share a name
///
/// Duplicate index rows and versions that sanitize to the same name would
/// otherwise be created again on every pass. The latest-flagged entry wins,
/// then the newer creation time, then the first seen.
#[must_use]
pub fn dedupe_entries(entries: Vec<AppCatalogEntry>) -> Vec<AppCatalogEntry> {
    let mut kept: Vec<AppCatalogEntry> = Vec::with_capacity(entries.len());
    let mut positions: BTreeMap<String, usize> = BTreeMap::new();
    for entry in entries {
        let name = entry.name_any();
        let Some(&at) = positions.get(&name) else {
            positions.insert(name, kept.len());
            kept.push(entry);
            continue;
        };
        let existing = &kept[at];
        warn!(
            entry = name.as_str(),
            kept = existing.spec.version.as_str(),
            duplicate = entry.spec.version.as_str(),
            "Duplicate catalog entry name"
        );
        let replaces = match (is_latest(&entry), is_latest(existing)) {
            (true, false) => true,
            (false, true) => false,
            _ => entry_created(&entry) > entry_created(existing),
        };
        if replaces {
            kept[at] = entry;
        }
    }
    kept
}

/// Build the entry object for one kept version
#[must_use]
pub fn build_entry(
    catalog: &Catalog,
    chart: &str,
    selected: &Selected,
    metadata: Option<&EntryMetadata>,
) -> AppCatalogEntry {
    let catalog_name = catalog.name_any();
    let namespace = catalog.namespace().unwrap_or_default();
    let entry = &selected.entry;

    let mut annotations = entry.annotations.clone();
    let mut api_version = entry.api_version.clone();
    let mut upstream_chart_version = String::new();
    let mut restrictions = None;
    let mut date_updated = None;
    if let Some(metadata) = metadata {
        annotations.extend(metadata.annotations.clone());
        if !metadata.chart_api_version.is_empty() {
            api_version.clone_from(&metadata.chart_api_version);
        }
        upstream_chart_version.clone_from(&metadata.upstream_chart_version);
        restrictions.clone_from(&metadata.restrictions);
        date_updated.clone_from(&metadata.data_created);
    }

    let labels = BTreeMap::from([
        (LABEL_APP_NAME.to_string(), chart.to_string()),
        (LABEL_CATALOG_NAME.to_string(), catalog_name.clone()),
        (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (LABEL_LATEST.to_string(), selected.latest.to_string()),
    ]);

    AppCatalogEntry {
        metadata: ObjectMeta {
            name: Some(entry_name(&catalog_name, chart, &entry.version)),
            namespace: Some(namespace.clone()),
            labels: Some(labels),
            owner_references: catalog.controller_owner_ref(&()).map(|r| vec![r]),
            ..ObjectMeta::default()
        },
        spec: AppCatalogEntrySpec {
            app_name: chart.to_string(),
            app_version: entry.app_version.clone(),
            version: entry.version.clone(),
            catalog: ObjectRef {
                name: catalog_name,
                namespace,
            },
            chart: EntryChart {
                api_version,
                description: entry.description.clone(),
                home: entry.home.clone(),
                icon: entry.icon.clone(),
                keywords: entry.keywords.clone(),
                urls: entry.urls.clone(),
                upstream_chart_version,
                annotations,
            },
            date_created: entry.created.clone(),
            date_updated,
            restrictions,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(version: &str, created: &str) -> IndexEntry {
        IndexEntry {
            name: "web".to_string(),
            version: version.to_string(),
            created: Some(created.to_string()),
            ..IndexEntry::default()
        }
    }

    fn latest_of(selected: &[Selected]) -> Vec<&str> {
        selected
            .iter()
            .filter(|s| s.latest)
            .map(|s| s.entry.version.as_str())
            .collect()
    }

    #[test]
    fn latest_ignores_creation_order() {
        let entries = vec![
            entry("1.2.0", "2024-01-04T00:00:00Z"),
            entry("1.2.0-rc1", "2024-01-03T00:00:00Z"),
            entry("2.0.0", "2024-01-01T00:00:00Z"),
            entry("1.9.9", "2024-01-02T00:00:00Z"),
        ];
        let selected = select_versions("web", &entries, 5);
        assert_eq!(latest_of(&selected), vec!["2.0.0"]);
    }

    #[test]
    fn equal_normalized_versions_prefer_later_creation() {
        let entries = vec![
            entry("1.0.0", "2024-01-01T00:00:00Z"),
            entry("1.0.0-alpha", "2024-02-01T00:00:00Z"),
        ];
        let selected = select_versions("web", &entries, 5);
        assert_eq!(latest_of(&selected), vec!["1.0.0-alpha"]);
    }

    #[test]
    fn latest_is_pinned_outside_retention_window() {
        // 8 versions, latest (9.0.0) is the 7th-oldest
        let entries = vec![
            entry("0.1.0", "2024-01-01T00:00:00Z"),
            entry("9.0.0", "2024-01-02T00:00:00Z"),
            entry("0.3.0", "2024-01-03T00:00:00Z"),
            entry("0.4.0", "2024-01-04T00:00:00Z"),
            entry("0.5.0", "2024-01-05T00:00:00Z"),
            entry("0.6.0", "2024-01-06T00:00:00Z"),
            entry("0.7.0", "2024-01-07T00:00:00Z"),
            entry("0.8.0", "2024-01-08T00:00:00Z"),
        ];
        let selected = select_versions("web", &entries, 5);
        assert_eq!(selected.len(), 6);
        assert_eq!(selected[0].entry.version, "0.8.0");
        assert_eq!(latest_of(&selected), vec!["9.0.0"]);
    }

    #[test]
    fn invalid_versions_are_skipped() {
        let entries = vec![
            entry("not-a-version", "2024-01-02T00:00:00Z"),
            entry("1.0.0", "2024-01-01T00:00:00Z"),
        ];
        let selected = select_versions("web", &entries, 5);
        assert_eq!(selected.len(), 1);
        assert!(selected[0].latest);
    }

    fn named(name: &str, version: &str, created: &str, latest: bool) -> AppCatalogEntry {
        let mut entry = AppCatalogEntry::new(
            name,
            AppCatalogEntrySpec {
                version: version.to_string(),
                date_created: Some(created.to_string()),
                ..AppCatalogEntrySpec::default()
            },
        );
        entry
            .labels_mut()
            .insert(LABEL_LATEST.to_string(), latest.to_string());
        entry
    }

    #[test]
    fn colliding_names_keep_one_entry() {
        let entries = vec![
            named("stable-web-1.0.0-a", "1.0.0+a", "2024-01-01T00:00:00Z", false),
            named("stable-web-2.0.0", "2.0.0", "2024-01-03T00:00:00Z", true),
            named("stable-web-1.0.0-a", "1.0.0-a", "2024-01-02T00:00:00Z", false),
            named("stable-web-2.0.0", "2.0.0", "2024-01-04T00:00:00Z", false),
        ];
        let kept = dedupe_entries(entries);
        let versions: Vec<(&str, &str)> = kept
            .iter()
            .map(|e| (e.spec.version.as_str(), e.spec.date_created.as_deref().unwrap_or_default()))
            .collect();
        assert_eq!(
            versions,
            vec![
                ("1.0.0-a", "2024-01-02T00:00:00Z"),
                ("2.0.0", "2024-01-03T00:00:00Z"),
            ]
        );
    }

    #[test]
    fn no_valid_versions_publish_nothing() {
        assert!(select_versions("web", &[entry("latest", "2024-01-01T00:00:00Z")], 5).is_empty());
    }

    #[test]
    fn entry_names_are_dns_safe() {
        assert_eq!(entry_name("stable", "Web_App", "1.2.0+build.7"), "stable-web-app-1.2.0-build.7");
        assert_eq!(entry_name("stable", "web", "1.0.0"), "stable-web-1.0.0");
    }

    #[test]
    fn built_entry_carries_labels_and_metadata() {
        let mut catalog = Catalog::new("stable", Default::default());
        catalog.metadata.namespace = Some("default".to_string());
        catalog.metadata.uid = Some("uid-1".to_string());
        let selected = Selected {
            entry: entry("1.0.0", "2024-01-01T00:00:00Z"),
            latest: true,
        };
        let metadata = EntryMetadata {
            upstream_chart_version: "0.9.0".to_string(),
            data_created: Some("2024-01-05T00:00:00Z".to_string()),
            ..EntryMetadata::default()
        };
        let built = build_entry(&catalog, "web", &selected, Some(&metadata));
        let labels = built.metadata.labels.unwrap();
        assert_eq!(labels[LABEL_LATEST], "true");
        assert_eq!(labels[LABEL_CATALOG_NAME], "stable");
        assert_eq!(built.spec.chart.upstream_chart_version, "0.9.0");
        assert_eq!(built.spec.date_updated.as_deref(), Some("2024-01-05T00:00:00Z"));
        assert_eq!(built.metadata.owner_references.unwrap()[0].name, "stable");
    }
}
