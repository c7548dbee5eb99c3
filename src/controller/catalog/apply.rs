//! # Entry Diff-Apply
//!
//! Converges the live AppCatalogEntry objects of a Catalog to the derived
//! set, keyed by name. One failed item never stops the batch; failures are
//! counted in the [`ApplySummary`].

use crate::controller::reconciler::resource::{tolerate_exists, tolerate_missing};
use crate::crd::{AppCatalogEntry, AppCatalogEntrySpec};
use crate::store::{ObjectKey, ObjectStore, StoreError};
use chrono::DateTime;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Outcome counts of one diff-apply
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub errored: u64,
}

impl ApplySummary {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Epoch seconds of an RFC3339 timestamp; other strings compare verbatim
fn same_instant(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
                (Ok(a), Ok(b)) => a.timestamp() == b.timestamp(),
                _ => a == b,
            }
        }
        (a, b) => a == b,
    }
}

fn same_spec(current: &AppCatalogEntrySpec, desired: &AppCatalogEntrySpec) -> bool {
    let without_dates = |spec: &AppCatalogEntrySpec| AppCatalogEntrySpec {
        date_created: None,
        date_updated: None,
        ..spec.clone()
    };
    without_dates(current) == without_dates(desired)
        && same_instant(current.date_created.as_deref(), desired.date_created.as_deref())
        && same_instant(current.date_updated.as_deref(), desired.date_updated.as_deref())
}

/// Whether the live entry already matches the derived one
///
/// Only the fields the deriver owns are compared: spec, its labels and the
/// owner reference.
#[must_use]
pub fn entry_matches(current: &AppCatalogEntry, desired: &AppCatalogEntry) -> bool {
    let labels_match = desired
        .labels()
        .iter()
        .all(|(k, v)| current.labels().get(k) == Some(v));
    let owners_match = desired
        .metadata
        .owner_references
        .as_ref()
        .is_none_or(|owners| current.metadata.owner_references.as_ref() == Some(owners));
    labels_match && owners_match && same_spec(&current.spec, &desired.spec)
}

/// Desired state written onto the live object, keeping its identity and
/// version token
fn merged(mut current: AppCatalogEntry, desired: AppCatalogEntry) -> AppCatalogEntry {
    let labels = current.labels_mut();
    for (k, v) in desired.labels() {
        labels.insert(k.clone(), v.clone());
    }
    if desired.metadata.owner_references.is_some() {
        current.metadata.owner_references = desired.metadata.owner_references;
    }
    current.spec = desired.spec;
    current
}

fn record(
    applied: &mut u64,
    errored: &mut u64,
    name: &str,
    action: &str,
    result: Result<(), StoreError>,
) {
    match result {
        Ok(()) => {
            *applied += 1;
            debug!(entry = name, action, "Applied catalog entry");
        }
        Err(e) => {
            *errored += 1;
            warn!(entry = name, action, error = %e, "Failed to apply catalog entry");
        }
    }
}

/// Converge `current` to `desired`
pub async fn apply_entries(
    store: &dyn ObjectStore<AppCatalogEntry>,
    current: Vec<AppCatalogEntry>,
    desired: Vec<AppCatalogEntry>,
) -> ApplySummary {
    let mut summary = ApplySummary::default();
    let mut live: BTreeMap<String, AppCatalogEntry> = current
        .into_iter()
        .map(|entry| (entry.name_any(), entry))
        .collect();

    for entry in desired {
        let name = entry.name_any();
        match live.remove(&name) {
            None => {
                let result = tolerate_exists(store.create(&entry).await);
                record(&mut summary.created, &mut summary.errored, &name, "create", result);
            }
            Some(existing) if entry_matches(&existing, &entry) => {}
            Some(existing) => {
                let result = store.replace(&merged(existing, entry)).await.map(|_| ());
                record(&mut summary.updated, &mut summary.errored, &name, "update", result);
            }
        }
    }

    for (name, extra) in live {
        let result = tolerate_missing(store.delete(&ObjectKey::of(&extra)).await);
        record(&mut summary.deleted, &mut summary.errored, &name, "delete", result);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_compare_by_epoch_seconds() {
        assert!(same_instant(
            Some("2024-01-01T10:00:00Z"),
            Some("2024-01-01T12:00:00+02:00")
        ));
        assert!(same_instant(
            Some("2024-01-01T10:00:00.250Z"),
            Some("2024-01-01T10:00:00Z")
        ));
        assert!(!same_instant(Some("2024-01-01T10:00:00Z"), None));
        assert!(same_instant(Some("yesterday"), Some("yesterday")));
    }

    #[test]
    fn unrelated_live_fields_are_ignored() {
        let desired = AppCatalogEntry::new(
            "stable-web-1.0.0",
            AppCatalogEntrySpec {
                app_name: "web".to_string(),
                version: "1.0.0".to_string(),
                date_created: Some("2024-01-01T10:00:00Z".to_string()),
                ..AppCatalogEntrySpec::default()
            },
        );
        let mut current = desired.clone();
        current.metadata.resource_version = Some("42".to_string());
        current
            .labels_mut()
            .insert("team".to_string(), "platform".to_string());
        current.spec.date_created = Some("2024-01-01T11:00:00+01:00".to_string());
        assert!(entry_matches(&current, &desired));

        current.spec.app_version = "2.0".to_string();
        assert!(!entry_matches(&current, &desired));
    }
}
