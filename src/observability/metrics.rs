//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `app_operator_reconciliations_total` - App reconcile passes
//! - `app_operator_reconciliation_errors_total` - App reconcile passes that failed
//! - `app_operator_reconciliation_duration_seconds` - App reconcile pass duration
//! - `app_operator_stage_outcomes_total{stage,outcome}` - Per-stage results
//! - `app_operator_requeues_total{reason}` - Requeues by reason
//! - `app_operator_catalog_entries_total{operation}` - Entry create/update/delete/error counts
//! - `app_operator_index_fetches_total{result}` - Repository index downloads
//! - `app_operator_index_rebuilds_total` - Full dependency index rebuilds
//! - `app_operator_watched_dependants` - Value objects currently indexed
//! - `app_operator_dependency_propagations_total{kind}` - Owner annotations patched
//! - `app_operator_status_syncs_total` - App status updates copied from Charts

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "app_operator_reconciliations_total",
        "Total number of App reconcile passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "app_operator_reconciliation_errors_total",
        "Total number of failed App reconcile passes",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "app_operator_reconciliation_duration_seconds",
            "Duration of App reconcile passes in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static STAGE_OUTCOMES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "app_operator_stage_outcomes_total",
            "Reconcile stage results by stage and outcome",
        ),
        &["stage", "outcome"],
    )
    .expect("Failed to create STAGE_OUTCOMES_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("app_operator_requeues_total", "Requeues by reason"),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static CATALOG_ENTRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "app_operator_catalog_entries_total",
            "AppCatalogEntry writes by operation (created, updated, deleted, errored)",
        ),
        &["operation"],
    )
    .expect("Failed to create CATALOG_ENTRIES_TOTAL metric - this should never happen")
});

static INDEX_FETCHES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "app_operator_index_fetches_total",
            "Repository index downloads by result",
        ),
        &["result"],
    )
    .expect("Failed to create INDEX_FETCHES_TOTAL metric - this should never happen")
});

static INDEX_REBUILDS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "app_operator_index_rebuilds_total",
        "Full rebuilds of the dependency reverse index",
    )
    .expect("Failed to create INDEX_REBUILDS_TOTAL metric - this should never happen")
});

static WATCHED_DEPENDANTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "app_operator_watched_dependants",
        "ConfigMaps and Secrets currently referenced by at least one App",
    )
    .expect("Failed to create WATCHED_DEPENDANTS metric - this should never happen")
});

static DEPENDENCY_PROPAGATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "app_operator_dependency_propagations_total",
            "App annotations patched after a value object changed",
        ),
        &["kind"],
    )
    .expect("Failed to create DEPENDENCY_PROPAGATIONS_TOTAL metric - this should never happen")
});

static STATUS_SYNCS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "app_operator_status_syncs_total",
        "App status updates copied from Charts",
    )
    .expect("Failed to create STATUS_SYNCS_TOTAL metric - this should never happen")
});

/// Register all metrics with the registry
///
/// # Errors
///
/// Returns an error if a metric is registered twice.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(STAGE_OUTCOMES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CATALOG_ENTRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INDEX_FETCHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INDEX_REBUILDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCHED_DEPENDANTS.clone()))?;
    REGISTRY.register(Box::new(DEPENDENCY_PROPAGATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_SYNCS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_stage_outcome(stage: &str, outcome: &str) {
    STAGE_OUTCOMES_TOTAL
        .with_label_values(&[stage, outcome])
        .inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_catalog_entries(created: u64, updated: u64, deleted: u64, errored: u64) {
    CATALOG_ENTRIES_TOTAL
        .with_label_values(&["created"])
        .inc_by(created);
    CATALOG_ENTRIES_TOTAL
        .with_label_values(&["updated"])
        .inc_by(updated);
    CATALOG_ENTRIES_TOTAL
        .with_label_values(&["deleted"])
        .inc_by(deleted);
    CATALOG_ENTRIES_TOTAL
        .with_label_values(&["errored"])
        .inc_by(errored);
}

pub fn increment_index_fetch(result: &str) {
    INDEX_FETCHES_TOTAL.with_label_values(&[result]).inc();
}

pub fn increment_index_rebuilds() {
    INDEX_REBUILDS_TOTAL.inc();
}

pub fn set_watched_dependants(count: i64) {
    WATCHED_DEPENDANTS.set(count);
}

pub fn increment_dependency_propagations(kind: &str) {
    DEPENDENCY_PROPAGATIONS_TOTAL
        .with_label_values(&[kind])
        .inc();
}

pub fn increment_status_syncs() {
    STATUS_SYNCS_TOTAL.inc();
}
