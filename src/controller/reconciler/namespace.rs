//! # Namespace Stage
//!
//! Ensures the App's namespace and its release namespace exist in the target
//! cluster. Namespaces are created, never deleted.

use crate::constants::{LABEL_MANAGED_BY, OPERATOR_NAME};
use crate::controller::reconciler::resource::{tolerate_exists, Change, ManagedResource, Pass};
use crate::controller::reconciler::types::StageError;
use crate::crd::App;
use crate::store::ObjectKey;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default, Clone, Copy)]
pub struct NamespaceStage;

fn wanted(app: &App) -> BTreeSet<String> {
    [app.metadata.namespace.clone(), Some(app.spec.namespace.clone())]
        .into_iter()
        .flatten()
        .filter(|ns| !ns.is_empty())
        .collect()
}

#[async_trait]
impl ManagedResource for NamespaceStage {
    type State = BTreeSet<String>;

    fn name(&self) -> &'static str {
        "namespace"
    }

    async fn current(&self, app: &App, pass: &Pass<'_>) -> Result<Option<Self::State>, StageError> {
        let mut existing = BTreeSet::new();
        for name in wanted(app) {
            let found = pass
                .target
                .namespaces
                .get(&ObjectKey::cluster(&name))
                .await
                .map_err(|e| pass.target.stage_error(e))?;
            if found.is_some() {
                existing.insert(name);
            }
        }
        Ok(Some(existing))
    }

    async fn desired(&self, app: &App, pass: &Pass<'_>) -> Result<Option<Self::State>, StageError> {
        if pass.deleting {
            return Ok(None);
        }
        Ok(Some(wanted(app)))
    }

    fn diff(
        &self,
        current: Option<Self::State>,
        desired: Option<Self::State>,
    ) -> Change<Self::State> {
        let current = current.unwrap_or_default();
        match desired {
            Some(desired) => {
                let missing: BTreeSet<String> = desired.difference(&current).cloned().collect();
                if missing.is_empty() {
                    Change::NoOp
                } else {
                    Change::Create(missing)
                }
            }
            None => Change::NoOp,
        }
    }

    async fn apply(&self, change: Change<Self::State>, pass: &Pass<'_>) -> Result<(), StageError> {
        let Change::Create(missing) = change else {
            return Ok(());
        };
        for name in missing {
            let namespace = Namespace {
                metadata: ObjectMeta {
                    name: Some(name),
                    labels: Some(BTreeMap::from([(
                        LABEL_MANAGED_BY.to_string(),
                        OPERATOR_NAME.to_string(),
                    )])),
                    ..ObjectMeta::default()
                },
                ..Namespace::default()
            };
            tolerate_exists(pass.target.namespaces.create(&namespace).await)
                .map_err(|e| pass.target.stage_error(e))?;
        }
        Ok(())
    }
}
