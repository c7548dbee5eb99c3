//! App Operator Library
//!
//! Reconciles `App` resources into the objects a chart installer consumes,
//! keeps Apps current when the values they depend on change, and derives
//! `AppCatalogEntry` objects from chart repository indexes.
//!
//! ## Quick Start
//!
//! ```rust
//! use app_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod events;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod store;
