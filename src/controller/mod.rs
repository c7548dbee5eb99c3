//! # Controller
//!
//! Core controller modules for the App Operator.
//!
//! - `backoff`: Fibonacci backoff for reconcile errors and HTTP retries
//! - `catalog`: Catalog entry derivation
//! - `reconciler`: App reconciliation (stages and diff engine)
//! - `server`: HTTP server for metrics and health checks
//! - `status_sync`: Chart to App status mirroring
//! - `watcher`: dependency index and change propagation

pub mod backoff;
pub mod catalog;
pub mod reconciler;
pub mod server;
pub mod status_sync;
pub mod watcher;
