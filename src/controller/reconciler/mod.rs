//! # Reconciler
//!
//! Turns an App into the objects an installer needs, one stage per managed
//! kind.
//!
//! - `resource`: the generic diff engine (`ManagedResource`, `Stage`)
//! - `namespace`, `values`, `chart`, `status`: the stages
//! - `target`: target cluster resolution
//! - `reconcile`: entry point with finalizer handling
//! - `types`: context, errors and outcomes

pub mod chart;
pub mod namespace;
pub mod reconcile;
pub mod resource;
pub mod status;
pub mod target;
pub mod types;
pub mod values;

pub use reconcile::{app_stages, reconcile, reconcile_app, TARGET_STAGE};
pub use resource::{Change, ManagedResource, Pass, Stage};
pub use target::{KubeTargetResolver, StaticTargetResolver, TargetResolver, TargetStores};
pub use types::{
    Applied, BackoffState, PassOutcome, Reconciler, ReconcilerError, StageError, StageOutcome,
};
