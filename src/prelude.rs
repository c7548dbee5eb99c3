//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use app_operator::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, reconcile_app, Applied, BackoffState, PassOutcome, Reconciler, ReconcilerError,
    StaticTargetResolver, TargetResolver, TargetStores,
};

// Catalog and dependency tracking
pub use crate::controller::catalog::{ApplySummary, CatalogDeriver, IndexSource};
pub use crate::controller::watcher::{DependencyWatcher, Propagator, ReverseIndex};

// Object store
pub use crate::store::{MemoryStore, MetadataPatch, ObjectKey, ObjectStore, StoreError};

// Config types - for configuration management
pub use crate::config::{
    ControllerConfig, ServerConfig, SharedControllerConfig, SharedServerConfig,
};
