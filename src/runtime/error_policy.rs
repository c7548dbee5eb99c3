//! # Error Policy
//!
//! Backoff for failed reconcile passes and classification of controller
//! stream errors.

use crate::controller::catalog::CatalogDeriver;
use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::{App, Catalog};
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Fallback delay when the backoff table is unavailable
const DEFAULT_BACKOFF_SECS: u64 = 60;

/// Next Fibonacci delay for one resource, with its error count
fn next_backoff(
    states: &Mutex<HashMap<String, BackoffState>>,
    resource_key: &str,
) -> (u64, u32) {
    match states.lock() {
        Ok(mut states) => {
            let state = states.entry(resource_key.to_string()).or_default();
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (DEFAULT_BACKOFF_SECS, 0)
        }
    }
}

fn requeue_with_backoff(
    kind: &str,
    name: &str,
    namespace: &str,
    error: &ReconcilerError,
    states: &Mutex<HashMap<String, BackoffState>>,
) -> Action {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = kind,
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {} {}/{}: {}", kind, namespace, name, error);
    observability::metrics::increment_reconciliation_errors();

    let (backoff_seconds, error_count) = next_backoff(states, &format!("{namespace}/{name}"));
    let delay = chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(600));
    let next_trigger_time = chrono::Utc::now() + delay;
    info!(
        "Retrying in {}s at {} (error count: {})",
        backoff_seconds,
        next_trigger_time.to_rfc3339(),
        error_count
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Error policy of the App controller
///
/// Backoff is tracked per App so one failing App never slows down others.
pub fn handle_reconciliation_error(
    obj: Arc<App>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    requeue_with_backoff(
        "App",
        &obj.name_any(),
        &obj.namespace().unwrap_or_default(),
        error,
        &ctx.backoff_states,
    )
}

/// Error policy of the Catalog controller
pub fn handle_catalog_error(
    obj: Arc<Catalog>,
    error: &ReconcilerError,
    ctx: Arc<CatalogDeriver>,
) -> Action {
    requeue_with_backoff(
        "Catalog",
        &obj.name_any(),
        &obj.namespace().unwrap_or_default(),
        error,
        &ctx.backoff_states,
    )
}

/// Log a controller stream error at the level it deserves
///
/// Returns `true` for unexpected errors. Objects deleted in flight and
/// expired resource versions are routine.
pub fn log_stream_error(error_string: &str) -> bool {
    let is_not_found = error_string.contains("ObjectNotFound") || error_string.contains("404");
    let is_expired = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired");

    if is_not_found {
        warn!("Object not found while reconciling (deleted in flight?): {}", error_string);
        false
    } else if is_expired {
        warn!("Watch resource version expired (410), watch will re-list");
        false
    } else {
        error!("Controller stream error: {}", error_string);
        true
    }
}
