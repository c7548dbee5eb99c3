//! # App Reconciliation
//!
//! Entry point called by the App controller. Handles the finalizer, resolves
//! the target cluster and runs the stages in order:
//! namespace, values (ConfigMap, then Secret), chart, status.

use crate::constants::APP_FINALIZER;
use crate::controller::reconciler::chart::ChartStage;
use crate::controller::reconciler::namespace::NamespaceStage;
use crate::controller::reconciler::resource::{run_pass, Pass, Stage};
use crate::controller::reconciler::status::StatusStage;
use crate::controller::reconciler::types::{PassOutcome, Reconciler, ReconcilerError, StageError};
use crate::controller::reconciler::values::ValuesStage;
use crate::crd::App;
use crate::events::OperatorEvent;
use crate::observability::metrics;
use crate::store::{MetadataPatch, ObjectKey};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Stage name reported when the target cluster cannot be resolved
pub const TARGET_STAGE: &str = "target";

/// Stages of an App pass, in execution order
#[must_use]
pub fn app_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(NamespaceStage),
        Box::new(ValuesStage::<ConfigMap>::default()),
        Box::new(ValuesStage::<Secret>::default()),
        Box::new(ChartStage),
        Box::new(StatusStage),
    ]
}

/// Run one pass for an App without touching its finalizer
///
/// `deleting` runs the pass with every derived desired state absent.
///
/// # Errors
///
/// Returns the error of the first failing stage.
pub async fn reconcile_app(
    app: &App,
    ctx: &Reconciler,
    deleting: bool,
) -> Result<PassOutcome, ReconcilerError> {
    let catalog_namespace = {
        let config = ctx.config.read().await;
        app.catalog_namespace(&config.default_catalog_namespace)
            .to_string()
    };
    let target = match ctx.targets.stores_for(app).await {
        Ok(target) => target,
        Err(StageError::Cancel(reason)) => {
            return Ok(PassOutcome::Cancelled {
                stage: TARGET_STAGE,
                reason,
            });
        }
        Err(StageError::Failed(e)) => return Err(e),
    };
    let pass = Pass {
        reconciler: ctx,
        app_key: ObjectKey::of(app),
        target: &target,
        deleting,
        catalog_namespace,
    };
    run_pass(&app_stages(), app, &pass).await
}

fn has_finalizer(app: &App) -> bool {
    app.finalizers().iter().any(|f| f == APP_FINALIZER)
}

async fn set_finalizer(app: &App, ctx: &Reconciler, present: bool) -> Result<(), ReconcilerError> {
    let mut finalizers: Vec<String> = app
        .finalizers()
        .iter()
        .filter(|f| *f != APP_FINALIZER)
        .cloned()
        .collect();
    if present {
        finalizers.push(APP_FINALIZER.to_string());
    }
    ctx.apps
        .patch_metadata(&ObjectKey::of(app), &MetadataPatch::default().finalizers(finalizers))
        .await?;
    Ok(())
}

/// Reconcile an App: add the finalizer, run a pass, and on deletion clean up
/// derived objects before releasing the finalizer
///
/// # Errors
///
/// Store failures and stage failures are returned for the error policy to
/// back off on; cancelled passes are not errors.
pub async fn reconcile(app: Arc<App>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let name = app.name_any();
    let namespace = app.namespace().unwrap_or_default();
    let resource_key = format!("{namespace}/{name}");
    metrics::increment_reconciliations();

    let deleting = app.meta().deletion_timestamp.is_some();
    if deleting && !has_finalizer(&app) {
        debug!(resource.name = name.as_str(), "App already cleaned up");
        return Ok(Action::await_change());
    }
    if !deleting && !has_finalizer(&app) {
        set_finalizer(&app, &ctx, true).await?;
    }

    let outcome = reconcile_app(&app, &ctx, deleting).await?;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    if ctx.reset_backoff(&resource_key) {
        info!(resource.name = name.as_str(), "App recovered, backoff reset");
    }

    let (cancel_requeue, resync) = {
        let config = ctx.config.read().await;
        (config.cancel_requeue(), config.resync_interval())
    };

    match outcome {
        // Derived objects in an unresolvable cluster cannot be removed;
        // holding the finalizer would leave the App terminating forever.
        PassOutcome::Cancelled {
            stage: TARGET_STAGE,
            reason,
        } if deleting => {
            warn!(
                resource.name = name.as_str(),
                resource.namespace = namespace.as_str(),
                reason = reason.as_str(),
                "Target cluster unavailable, releasing finalizer without cleanup"
            );
            ctx.events
                .publish(
                    &app.object_ref(&()),
                    OperatorEvent::warning(
                        "TargetUnavailable",
                        "Delete",
                        format!("derived objects left in place: {reason}"),
                    ),
                )
                .await;
            set_finalizer(&app, &ctx, false).await?;
            Ok(Action::await_change())
        }
        PassOutcome::Cancelled { stage, reason } => {
            warn!(
                resource.name = name.as_str(),
                resource.namespace = namespace.as_str(),
                stage,
                reason = reason.as_str(),
                "Pass cancelled"
            );
            ctx.events
                .publish(
                    &app.object_ref(&()),
                    OperatorEvent::warning("Cancelled", "Reconcile", reason),
                )
                .await;
            metrics::increment_requeues_total("cancelled");
            Ok(Action::requeue(cancel_requeue))
        }
        PassOutcome::Completed(stages) if deleting => {
            set_finalizer(&app, &ctx, false).await?;
            info!(
                resource.name = name.as_str(),
                resource.namespace = namespace.as_str(),
                cleaned = stages.len(),
                "App deleted, derived objects removed"
            );
            Ok(Action::await_change())
        }
        PassOutcome::Completed(_) => {
            metrics::increment_requeues_total("resync");
            Ok(Action::requeue(resync))
        }
    }
}
