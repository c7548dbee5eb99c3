//! # Types
//!
//! Core types for the App reconciler.

use crate::config::SharedControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::target::TargetResolver;
use crate::crd::{App, Catalog};
use crate::events::EventPublisher;
use crate::store::{ObjectStore, StoreError};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("store error: {0}")]
    Store(StoreError),
    /// A store returned an object that is not the expected kind
    #[error("unexpected object shape: {0}")]
    ShapeMismatch(String),
    #[error("invalid values: {0}")]
    Values(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),
}

impl From<StoreError> for ReconcilerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Decode(msg) => ReconcilerError::ShapeMismatch(msg),
            other => ReconcilerError::Store(other),
        }
    }
}

/// Why a stage could not finish
#[derive(Debug)]
pub enum StageError {
    /// Desired state cannot be computed yet (missing reference, unreachable
    /// target cluster). Not a failure.
    Cancel(String),
    Failed(ReconcilerError),
}

impl From<ReconcilerError> for StageError {
    fn from(error: ReconcilerError) -> Self {
        StageError::Failed(error)
    }
}

impl From<StoreError> for StageError {
    fn from(error: StoreError) -> Self {
        StageError::Failed(error.into())
    }
}

/// What a stage did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    NoOp,
    Created,
    Updated,
    Deleted,
}

impl Applied {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Applied::NoOp => "no-op",
            Applied::Created => "created",
            Applied::Updated => "updated",
            Applied::Deleted => "deleted",
        }
    }
}

/// Result of one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Applied(Applied),
    Cancelled(String),
}

/// Result of one pass over all stages of an App
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every stage ran; the stage results in order
    Completed(Vec<(&'static str, Applied)>),
    /// A stage cancelled the pass
    Cancelled { stage: &'static str, reason: String },
}

impl PassOutcome {
    /// Whether every stage reported no change
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, PassOutcome::Completed(stages) if stages.iter().all(|(_, a)| *a == Applied::NoOp))
    }
}

/// Backoff state for a specific App
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::for_reconcile_errors(),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciler context shared by every App pass
///
/// Stores here address the operator's own cluster; target-cluster stores
/// come from `targets` per App.
#[derive(Clone)]
pub struct Reconciler {
    pub apps: Arc<dyn ObjectStore<App>>,
    pub catalogs: Arc<dyn ObjectStore<Catalog>>,
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub targets: Arc<dyn TargetResolver>,
    pub events: Arc<dyn EventPublisher>,
    pub config: SharedControllerConfig,
    /// Backoff state per App (namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Forget the error history of an App after a successful pass
    pub fn reset_backoff(&self, resource_key: &str) -> bool {
        match self.backoff_states.lock() {
            Ok(mut states) => states
                .remove(resource_key)
                .is_some_and(|state| state.error_count > 0),
            Err(_) => false,
        }
    }
}
