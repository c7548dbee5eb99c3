//! # Managed Resources
//!
//! The create/update/delete engine shared by every kind an App manages.
//!
//! Each kind implements [`ManagedResource`]:
//! - `current`: read the live state (read-only)
//! - `desired`: compute the state the App asks for
//! - `diff`: decide between no-op, create, update and delete
//! - `apply`: the single side-effecting call
//!
//! A blanket impl turns every `ManagedResource` into a type-erased [`Stage`]
//! so a pass can hold its kinds as an ordered list.

use crate::controller::reconciler::target::TargetStores;
use crate::controller::reconciler::types::{
    Applied, PassOutcome, Reconciler, ReconcilerError, StageError, StageOutcome,
};
use crate::crd::App;
use crate::observability::metrics;
use crate::store::{ObjectKey, StoreError};
use async_trait::async_trait;
use std::fmt::Debug;
use tracing::{debug, info};

/// Decision taken by `diff`
#[derive(Debug, Clone, PartialEq)]
pub enum Change<S> {
    NoOp,
    Create(S),
    /// The current object with the desired payload merged in; identity and
    /// version token are kept
    Update(S),
    Delete(S),
}

/// Everything a stage may read during one pass of one App
#[derive(Debug)]
pub struct Pass<'a> {
    pub reconciler: &'a Reconciler,
    /// Key of the App in the operator's cluster
    pub app_key: ObjectKey,
    pub target: &'a TargetStores,
    /// The App is being deleted; every derived desired state is absent
    pub deleting: bool,
    /// Namespace searched for the App's Catalog
    pub catalog_namespace: String,
}

/// One kind managed on behalf of an App
#[async_trait]
pub trait ManagedResource: Send + Sync {
    type State: Clone + Debug + Send + Sync;

    fn name(&self) -> &'static str;

    async fn current(&self, app: &App, pass: &Pass<'_>) -> Result<Option<Self::State>, StageError>;

    async fn desired(&self, app: &App, pass: &Pass<'_>) -> Result<Option<Self::State>, StageError>;

    fn diff(
        &self,
        current: Option<Self::State>,
        desired: Option<Self::State>,
    ) -> Change<Self::State>;

    async fn apply(&self, change: Change<Self::State>, pass: &Pass<'_>) -> Result<(), StageError>;
}

/// Type-erased step of a pass
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, app: &App, pass: &Pass<'_>) -> Result<StageOutcome, ReconcilerError>;
}

#[async_trait]
impl<R> Stage for R
where
    R: ManagedResource,
{
    fn name(&self) -> &'static str {
        ManagedResource::name(self)
    }

    async fn run(&self, app: &App, pass: &Pass<'_>) -> Result<StageOutcome, ReconcilerError> {
        let result = async {
            let current = self.current(app, pass).await?;
            let desired = self.desired(app, pass).await?;
            let change = self.diff(current, desired);
            let applied = match &change {
                Change::NoOp => Applied::NoOp,
                Change::Create(_) => Applied::Created,
                Change::Update(_) => Applied::Updated,
                Change::Delete(_) => Applied::Deleted,
            };
            if applied != Applied::NoOp {
                self.apply(change, pass).await?;
            }
            Ok::<Applied, StageError>(applied)
        }
        .await;

        match result {
            Ok(applied) => {
                metrics::increment_stage_outcome(ManagedResource::name(self), applied.as_str());
                Ok(StageOutcome::Applied(applied))
            }
            Err(StageError::Cancel(reason)) => {
                metrics::increment_stage_outcome(ManagedResource::name(self), "cancelled");
                Ok(StageOutcome::Cancelled(reason))
            }
            Err(StageError::Failed(e)) => {
                metrics::increment_stage_outcome(ManagedResource::name(self), "failed");
                Err(e)
            }
        }
    }
}

/// Run the stages of one App in order. A cancelled or failed stage stops
/// the pass; later stages do not run.
pub async fn run_pass(
    stages: &[Box<dyn Stage>],
    app: &App,
    pass: &Pass<'_>,
) -> Result<PassOutcome, ReconcilerError> {
    let mut applied = Vec::with_capacity(stages.len());
    for stage in stages {
        match stage.run(app, pass).await? {
            StageOutcome::Applied(result) => {
                if result == Applied::NoOp {
                    debug!(stage = stage.name(), "Stage up to date");
                } else {
                    info!(stage = stage.name(), result = result.as_str(), "Stage applied");
                }
                applied.push((stage.name(), result));
            }
            StageOutcome::Cancelled(reason) => {
                return Ok(PassOutcome::Cancelled {
                    stage: stage.name(),
                    reason,
                });
            }
        }
    }
    Ok(PassOutcome::Completed(applied))
}

/// Generic object diff: `equal` compares operator-owned fields only,
/// `merge` writes the desired payload into the current object
pub fn diff_objects<S>(
    current: Option<S>,
    desired: Option<S>,
    equal: impl Fn(&S, &S) -> bool,
    merge: impl Fn(S, S) -> S,
) -> Change<S> {
    match (current, desired) {
        (None, None) => Change::NoOp,
        (None, Some(desired)) => Change::Create(desired),
        (Some(current), None) => Change::Delete(current),
        (Some(current), Some(desired)) => {
            if equal(&current, &desired) {
                Change::NoOp
            } else {
                Change::Update(merge(current, desired))
            }
        }
    }
}

/// "Already exists" on create counts as success
pub fn tolerate_exists<T>(result: Result<T, StoreError>) -> Result<(), StoreError> {
    match result {
        Ok(_) | Err(StoreError::AlreadyExists) => Ok(()),
        Err(e) => Err(e),
    }
}

/// "Not found" on delete counts as success
pub fn tolerate_missing(result: Result<(), StoreError>) -> Result<(), StoreError> {
    match result {
        Ok(()) | Err(StoreError::NotFound) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(a: &(u32, &str), b: &(u32, &str)) -> bool {
        a.1 == b.1
    }

    fn merge(current: (u32, &'static str), desired: (u32, &'static str)) -> (u32, &'static str) {
        (current.0, desired.1)
    }

    #[test]
    fn diff_covers_all_transitions() {
        assert_eq!(diff_objects(None, None, eq, merge), Change::NoOp);
        assert_eq!(diff_objects(None, Some((0, "a")), eq, merge), Change::Create((0, "a")));
        assert_eq!(diff_objects(Some((7, "a")), None, eq, merge), Change::Delete((7, "a")));
        assert_eq!(diff_objects(Some((7, "a")), Some((0, "a")), eq, merge), Change::NoOp);
    }

    #[test]
    fn update_keeps_identity_of_current() {
        assert_eq!(
            diff_objects(Some((7, "a")), Some((0, "b")), eq, merge),
            Change::Update((7, "b"))
        );
    }

    #[test]
    fn sentinels_count_as_success() {
        assert!(tolerate_exists::<()>(Err(StoreError::AlreadyExists)).is_ok());
        assert!(tolerate_missing(Err(StoreError::NotFound)).is_ok());
        assert!(tolerate_missing(Err(StoreError::Conflict)).is_err());
    }
}
