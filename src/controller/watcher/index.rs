//! # Reverse Index
//!
//! Which Apps depend on which value objects. Keyed by the value object;
//! a forward map (App to value objects) lets a modified App drop the
//! associations it no longer declares.
//!
//! Every mutation returns an [`IndexDelta`]: value objects to mark as
//! watched and value objects whose last owner went away.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Kind of a value object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    ConfigMap,
    Secret,
}

impl ValueKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::ConfigMap => "ConfigMap",
            ValueKind::Secret => "Secret",
        }
    }
}

/// Identity of a value object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependantKey {
    pub kind: ValueKind,
    pub name: String,
    pub namespace: String,
}

impl DependantKey {
    pub fn new(kind: ValueKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for DependantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind.as_str(), self.namespace, self.name)
    }
}

/// Identity of an App
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey {
    pub name: String,
    pub namespace: String,
}

impl OwnerKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Marker changes caused by an index mutation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexDelta {
    /// Dependants that must carry the watched marker
    pub mark: Vec<DependantKey>,
    /// Dependants nobody depends on anymore
    pub unmark: Vec<DependantKey>,
}

#[derive(Debug, Default)]
pub struct ReverseIndex {
    dependants: DashMap<DependantKey, HashSet<OwnerKey>>,
    owners: DashMap<OwnerKey, HashSet<DependantKey>>,
}

impl ReverseIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the full dependency set of an added or modified App
    pub fn upsert(&self, owner: OwnerKey, dependencies: HashSet<DependantKey>) -> IndexDelta {
        let previous = self
            .owners
            .insert(owner.clone(), dependencies.clone())
            .unwrap_or_default();

        let mut unmark: Vec<DependantKey> = previous
            .difference(&dependencies)
            .filter(|dep| self.detach(dep, &owner))
            .cloned()
            .collect();
        unmark.sort();

        for dep in &dependencies {
            self.dependants
                .entry(dep.clone())
                .or_default()
                .insert(owner.clone());
        }

        let mut mark: Vec<DependantKey> = dependencies.into_iter().collect();
        mark.sort();
        IndexDelta { mark, unmark }
    }

    /// Forget a deleted App
    pub fn remove(&self, owner: &OwnerKey) -> IndexDelta {
        let Some((_, previous)) = self.owners.remove(owner) else {
            return IndexDelta::default();
        };
        let mut unmark: Vec<DependantKey> = previous
            .iter()
            .filter(|dep| self.detach(dep, owner))
            .cloned()
            .collect();
        unmark.sort();
        IndexDelta {
            mark: Vec::new(),
            unmark,
        }
    }

    /// Rebuild from scratch; nothing from the previous content is trusted
    ///
    /// The new content is built aside and swapped in key by key, so a key
    /// present before and after the rebuild is never seen missing by
    /// concurrent readers.
    pub fn replace_all(
        &self,
        entries: impl IntoIterator<Item = (OwnerKey, HashSet<DependantKey>)>,
    ) -> IndexDelta {
        let mut dependants: HashMap<DependantKey, HashSet<OwnerKey>> = HashMap::new();
        let mut owners: HashMap<OwnerKey, HashSet<DependantKey>> = HashMap::new();
        for (owner, dependencies) in entries {
            for dep in &dependencies {
                dependants
                    .entry(dep.clone())
                    .or_default()
                    .insert(owner.clone());
            }
            owners.entry(owner).or_default().extend(dependencies);
        }

        let mut unmark: Vec<DependantKey> = self
            .dependants
            .iter()
            .map(|e| e.key().clone())
            .filter(|dep| !dependants.contains_key(dep))
            .collect();
        let mut mark: Vec<DependantKey> = dependants.keys().cloned().collect();
        mark.sort();
        unmark.sort();

        for (dep, set) in dependants {
            self.dependants.insert(dep, set);
        }
        for (owner, set) in owners.iter() {
            self.owners.insert(owner.clone(), set.clone());
        }
        for dep in &unmark {
            self.dependants.remove(dep);
        }
        self.owners.retain(|owner, _| owners.contains_key(owner));
        IndexDelta { mark, unmark }
    }

    /// Apps depending on a value object
    #[must_use]
    pub fn owners_of(&self, dependant: &DependantKey) -> Vec<OwnerKey> {
        let mut owners: Vec<OwnerKey> = self
            .dependants
            .get(dependant)
            .map(|owners| owners.iter().cloned().collect())
            .unwrap_or_default();
        owners.sort();
        owners
    }

    /// Value objects an App depends on
    #[must_use]
    pub fn dependencies_of(&self, owner: &OwnerKey) -> HashSet<DependantKey> {
        self.owners
            .get(owner)
            .map(|deps| deps.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, dependant: &DependantKey) -> bool {
        self.dependants.contains_key(dependant)
    }

    /// Number of indexed value objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependants.is_empty()
    }

    /// Drop `owner` from a dependant's set; true when the set became empty
    fn detach(&self, dependant: &DependantKey, owner: &OwnerKey) -> bool {
        let emptied = if let Some(mut owners) = self.dependants.get_mut(dependant) {
            owners.remove(owner);
            owners.is_empty()
        } else {
            false
        };
        emptied && self
            .dependants
            .remove_if(dependant, |_, owners| owners.is_empty())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cm(name: &str) -> DependantKey {
        DependantKey::new(ValueKind::ConfigMap, "default", name)
    }

    fn secret(name: &str) -> DependantKey {
        DependantKey::new(ValueKind::Secret, "default", name)
    }

    fn deps(keys: &[DependantKey]) -> HashSet<DependantKey> {
        keys.iter().cloned().collect()
    }

    #[test]
    fn upsert_indexes_every_dependency() {
        let index = ReverseIndex::new();
        let app = OwnerKey::new("default", "web");
        let delta = index.upsert(app.clone(), deps(&[cm("a"), secret("a")]));
        assert_eq!(delta.mark.len(), 2);
        assert!(delta.unmark.is_empty());
        assert_eq!(index.owners_of(&cm("a")), vec![app.clone()]);
        assert_eq!(index.owners_of(&secret("a")), vec![app]);
    }

    #[test]
    fn same_name_different_kind_are_distinct() {
        let index = ReverseIndex::new();
        index.upsert(OwnerKey::new("default", "web"), deps(&[cm("a")]));
        assert!(index.contains(&cm("a")));
        assert!(!index.contains(&secret("a")));
    }

    #[test]
    fn modified_owner_loses_dropped_dependencies() {
        let index = ReverseIndex::new();
        let app = OwnerKey::new("default", "web");
        index.upsert(app.clone(), deps(&[cm("a"), cm("b")]));
        let delta = index.upsert(app.clone(), deps(&[cm("b")]));
        assert_eq!(delta.unmark, vec![cm("a")]);
        assert!(!index.contains(&cm("a")));
        assert_eq!(index.dependencies_of(&app), deps(&[cm("b")]));
    }

    #[test]
    fn shared_dependency_survives_one_owner_leaving() {
        let index = ReverseIndex::new();
        let web = OwnerKey::new("default", "web");
        let api = OwnerKey::new("default", "api");
        index.upsert(web.clone(), deps(&[cm("shared")]));
        index.upsert(api.clone(), deps(&[cm("shared")]));

        let delta = index.remove(&web);
        assert!(delta.unmark.is_empty());
        assert_eq!(index.owners_of(&cm("shared")), vec![api.clone()]);

        let delta = index.remove(&api);
        assert_eq!(delta.unmark, vec![cm("shared")]);
        assert!(index.is_empty());
    }

    #[test]
    fn replace_all_reports_vanished_dependants() {
        let index = ReverseIndex::new();
        index.upsert(OwnerKey::new("default", "old"), deps(&[cm("stale")]));
        let delta = index.replace_all([(OwnerKey::new("default", "new"), deps(&[cm("fresh")]))]);
        assert_eq!(delta.mark, vec![cm("fresh")]);
        assert_eq!(delta.unmark, vec![cm("stale")]);
        assert!(index.owners_of(&cm("stale")).is_empty());
    }

    #[test]
    fn rebuild_never_hides_a_dependant_indexed_on_both_sides() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let index = Arc::new(ReverseIndex::new());
        let web = OwnerKey::new("default", "web");
        let snapshot = || {
            std::iter::once((web.clone(), deps(&[cm("shared")]))).chain((0..2_000).map(|i| {
                (
                    OwnerKey::new("default", format!("app-{i}")),
                    deps(&[cm(&format!("values-{i}"))]),
                )
            }))
        };
        index.replace_all(snapshot());

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let index = Arc::clone(&index);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut misses = 0_usize;
                while !done.load(Ordering::Acquire) {
                    if index.owners_of(&cm("shared")).is_empty() {
                        misses += 1;
                    }
                }
                misses
            })
        };
        for _ in 0..20 {
            index.replace_all(snapshot());
        }
        done.store(true, Ordering::Release);

        assert_eq!(reader.join().unwrap(), 0);
        assert_eq!(index.owners_of(&cm("shared")), vec![web]);
        assert_eq!(index.len(), 2_001);
    }

    #[test]
    fn removing_unknown_owner_is_noop() {
        let index = ReverseIndex::new();
        assert_eq!(index.remove(&OwnerKey::new("default", "ghost")), IndexDelta::default());
    }
}
