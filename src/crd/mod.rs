//! # Custom Resource Definitions
//!
//! CRD types for the App Operator.
//!
//! ## Module Structure
//!
//! - `app.rs` - App (deployment intent) and its status
//! - `chart.rs` - Chart (release intent derived from an App)
//! - `catalog.rs` - Catalog (chart repositories)
//! - `catalog_entry.rs` - AppCatalogEntry (one chart version of a Catalog)

mod app;
mod catalog;
mod catalog_entry;
mod chart;

pub use app::{
    App, AppSpec, AppStatus, KubeConfig, KubeConfigContext, ObjectRef, ReleaseStatus,
    ValuesConfig,
};
pub use catalog::{Catalog, CatalogRepository, CatalogSpec};
pub use catalog_entry::{AppCatalogEntry, AppCatalogEntrySpec, EntryChart, EntryRestrictions};
pub use chart::{Chart, ChartConfig, ChartReleaseStatus, ChartSpec, ChartStatus, ChartValuesRef};

/// Default value for boolean true
pub fn default_true() -> bool {
    true
}
