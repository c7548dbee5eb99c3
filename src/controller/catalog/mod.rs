//! # Catalog Entry Deriver
//!
//! Keeps the AppCatalogEntry objects of each Catalog in line with its
//! repository index.
//!
//! - `index`: index and metadata downloads
//! - `derive`: version selection and entry construction
//! - `apply`: diff-apply with per-item failure counting
//! - `reconcile`: Catalog controller entry point

pub mod apply;
pub mod derive;
pub mod index;
pub mod reconcile;

pub use apply::{apply_entries, entry_matches, ApplySummary};
pub use derive::{build_entry, entry_name, select_versions, Selected};
pub use index::{
    EntryMetadata, HttpIndexSource, IndexEntry, IndexSource, RepoIndex, StaticIndexSource,
};
pub use reconcile::{owned_entries_selector, reconcile_catalog, CatalogDeriver};
