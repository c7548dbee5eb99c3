//! # Dependency Watcher
//!
//! Tracks which Apps depend on which ConfigMaps and Secrets and turns a
//! change of such an object into a fresh pass of every dependent App.
//!
//! - `index`: the reverse index (value object to Apps)
//! - `rebuild`: keeps the index and the watched markers current
//! - `propagate`: patches version annotations onto dependent Apps

pub mod index;
pub mod propagate;
pub mod rebuild;

pub use index::{DependantKey, IndexDelta, OwnerKey, ReverseIndex, ValueKind};
pub use propagate::{watched_selector, Propagator};
pub use rebuild::{DependencyWatcher, WatchState};
