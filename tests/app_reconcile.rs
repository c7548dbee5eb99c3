//! # App Reconciliation Tests
//!
//! Full passes against in-memory stores: first pass, idempotence,
//! convergence after a values change, cancellation and deletion.

mod common;

use app_operator::constants::{APP_FINALIZER, LABEL_MANAGED_BY, OPERATOR_NAME};
use app_operator::controller::reconciler::{
    reconcile, reconcile_app, Applied, PassOutcome, Reconciler, StageError, TargetResolver,
    TargetStores,
};
use app_operator::crd::App;
use app_operator::crd::ValuesConfig;
use app_operator::events::EventSeverity;
use app_operator::store::{ObjectKey, ObjectStore};
use common::*;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;

/// Resolver for Apps whose kubeconfig Secret is gone
#[derive(Debug)]
struct MissingKubeconfig;

#[async_trait::async_trait]
impl TargetResolver for MissingKubeconfig {
    async fn stores_for(&self, _app: &App) -> Result<TargetStores, StageError> {
        Err(StageError::Cancel("kubeconfig secret org-acme/remote not found".to_string()))
    }
}

/// Catalog with catalog-level values, an App with its own ConfigMap and a
/// user Secret
fn seeded() -> World {
    let world = World::new();
    world.config_maps.seed(values_config_map(
        CATALOG_NAMESPACE,
        "stable-values",
        "replicas: 1\nimage:\n  repository: nginx\n  tag: v1\n",
    ));
    world.catalogs.seed(catalog(
        "stable",
        Some(ValuesConfig {
            config_map: Some(object_ref(CATALOG_NAMESPACE, "stable-values")),
            secret: None,
        }),
    ));
    world
        .config_maps
        .seed(values_config_map(NAMESPACE, "web-values", "image:\n  tag: v2\n"));
    world
        .secrets
        .seed(values_secret(NAMESPACE, "web-user", "password: s3cret\n"));

    let mut web = app("web", "stable");
    web.spec.config = Some(ValuesConfig {
        config_map: Some(object_ref(NAMESPACE, "web-values")),
        secret: None,
    });
    web.spec.user_config = Some(ValuesConfig {
        config_map: None,
        secret: Some(object_ref(NAMESPACE, "web-user")),
    });
    world.apps.seed(web);
    world
}

fn stage(outcome: &PassOutcome, name: &str) -> Option<Applied> {
    match outcome {
        PassOutcome::Completed(stages) => stages
            .iter()
            .find(|(stage, _)| *stage == name)
            .map(|(_, applied)| *applied),
        PassOutcome::Cancelled { .. } => None,
    }
}

#[tokio::test]
async fn first_pass_creates_every_derived_object() {
    let world = seeded();
    let ctx = world.reconciler();
    let web = world.app("web").await.unwrap();

    let outcome = reconcile_app(&web, &ctx, false).await.unwrap();
    assert_eq!(stage(&outcome, "namespace"), Some(Applied::Created));
    assert_eq!(stage(&outcome, "chart-values"), Some(Applied::Created));
    assert_eq!(stage(&outcome, "chart-secrets"), Some(Applied::Created));
    assert_eq!(stage(&outcome, "chart"), Some(Applied::Created));
    assert_eq!(stage(&outcome, "status"), Some(Applied::Created));

    let namespaces: Vec<String> = world
        .target_namespaces
        .snapshot()
        .iter()
        .map(ResourceExt::name_any)
        .collect();
    assert_eq!(namespaces, vec![NAMESPACE.to_string(), "web".to_string()]);

    let values = world
        .target_config_maps
        .get(&ObjectKey::namespaced(NAMESPACE, "web-chart-values"))
        .await
        .unwrap()
        .expect("derived ConfigMap");
    assert_eq!(
        values.labels().get(LABEL_MANAGED_BY).map(String::as_str),
        Some(OPERATOR_NAME)
    );
    let merged: serde_yaml::Value =
        serde_yaml::from_str(&values.data.as_ref().unwrap()["values"]).unwrap();
    assert_eq!(merged["replicas"], serde_yaml::Value::from(1));
    assert_eq!(merged["image"]["repository"], serde_yaml::Value::from("nginx"));
    assert_eq!(merged["image"]["tag"], serde_yaml::Value::from("v2"));

    let secret = world
        .target_secrets
        .get(&ObjectKey::namespaced(NAMESPACE, "web-chart-secrets"))
        .await
        .unwrap()
        .expect("derived Secret");
    let raw = &secret.data.as_ref().unwrap()["values"].0;
    assert!(String::from_utf8_lossy(raw).contains("s3cret"));

    let chart = world
        .target_charts
        .get(&ObjectKey::namespaced(NAMESPACE, "web"))
        .await
        .unwrap()
        .expect("Chart");
    assert_eq!(chart.spec.namespace, "web");
    assert_eq!(chart.spec.version, "1.2.3");
    assert_eq!(
        chart.spec.tarball_url,
        "https://charts.example.com/stable/nginx-1.2.3.tgz"
    );
    let values_ref = chart.spec.config.config_map.expect("values reference");
    assert_eq!(values_ref.name, "web-chart-values");
    assert_eq!(
        Some(values_ref.resource_version),
        values.metadata.resource_version
    );
    assert!(chart.spec.config.secret.is_some());
}

#[tokio::test]
async fn second_pass_without_changes_is_a_noop() {
    let world = seeded();
    let ctx = world.reconciler();

    let web = world.app("web").await.unwrap();
    reconcile_app(&web, &ctx, false).await.unwrap();
    let versions_before: Vec<Option<String>> = world
        .target_config_maps
        .snapshot()
        .iter()
        .map(|cm| cm.metadata.resource_version.clone())
        .collect();

    let web = world.app("web").await.unwrap();
    let outcome = reconcile_app(&web, &ctx, false).await.unwrap();
    assert!(outcome.is_noop(), "unexpected changes: {outcome:?}");

    let versions_after: Vec<Option<String>> = world
        .target_config_maps
        .snapshot()
        .iter()
        .map(|cm| cm.metadata.resource_version.clone())
        .collect();
    assert_eq!(versions_before, versions_after);
}

#[tokio::test]
async fn values_change_converges_values_and_chart() {
    let world = seeded();
    let ctx = world.reconciler();
    let web = world.app("web").await.unwrap();
    reconcile_app(&web, &ctx, false).await.unwrap();

    let key = ObjectKey::namespaced(NAMESPACE, "web-values");
    let mut source = world.config_maps.get(&key).await.unwrap().unwrap();
    source
        .data
        .get_or_insert_with(Default::default)
        .insert("values".to_string(), "image:\n  tag: v3\n".to_string());
    world.config_maps.replace(&source).await.unwrap();

    let web = world.app("web").await.unwrap();
    let outcome = reconcile_app(&web, &ctx, false).await.unwrap();
    assert_eq!(stage(&outcome, "chart-values"), Some(Applied::Updated));
    assert_eq!(stage(&outcome, "chart-secrets"), Some(Applied::NoOp));
    assert_eq!(stage(&outcome, "chart"), Some(Applied::Updated));

    let values = world
        .target_config_maps
        .get(&ObjectKey::namespaced(NAMESPACE, "web-chart-values"))
        .await
        .unwrap()
        .unwrap();
    let merged: serde_yaml::Value =
        serde_yaml::from_str(&values.data.as_ref().unwrap()["values"]).unwrap();
    assert_eq!(merged["image"]["tag"], serde_yaml::Value::from("v3"));

    let chart = world
        .target_charts
        .get(&ObjectKey::namespaced(NAMESPACE, "web"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        Some(chart.spec.config.config_map.unwrap().resource_version),
        values.metadata.resource_version
    );

    let web = world.app("web").await.unwrap();
    assert!(reconcile_app(&web, &ctx, false).await.unwrap().is_noop());
}

#[tokio::test]
async fn missing_catalog_cancels_the_pass() {
    let world = World::new();
    world.apps.seed(app("web", "does-not-exist"));
    let ctx = world.reconciler();
    let web = world.app("web").await.unwrap();

    let outcome = reconcile_app(&web, &ctx, false).await.unwrap();
    match outcome {
        PassOutcome::Cancelled { stage, reason } => {
            assert_eq!(stage, "chart-values");
            assert!(reason.contains("does-not-exist"), "reason: {reason}");
        }
        other => panic!("expected a cancelled pass, got {other:?}"),
    }
    assert!(world.target_charts.snapshot().is_empty());
}

#[tokio::test]
async fn missing_values_source_cancels_without_writing_the_chart() {
    let world = seeded();
    world
        .secrets
        .delete(&ObjectKey::namespaced(NAMESPACE, "web-user"))
        .await
        .unwrap();
    let ctx = world.reconciler();
    let web = world.app("web").await.unwrap();

    let outcome = reconcile_app(&web, &ctx, false).await.unwrap();
    assert!(matches!(
        outcome,
        PassOutcome::Cancelled { stage: "chart-secrets", .. }
    ));
    assert!(world.target_charts.snapshot().is_empty());
    assert!(world.target_secrets.snapshot().is_empty());
}

#[tokio::test]
async fn cancelled_reconcile_requeues_and_publishes_a_warning() {
    let world = World::new();
    world.apps.seed(app("web", "does-not-exist"));
    let ctx = world.reconciler();
    let web = world.app("web").await.unwrap();

    let action = reconcile(Arc::new(web), Arc::clone(&ctx)).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));

    let events = world.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1.severity, EventSeverity::Warning);
    assert_eq!(events[0].1.reason, "Cancelled");
    assert_eq!(events[0].0.name.as_deref(), Some("web"));
}

#[tokio::test]
async fn deleted_app_is_cleaned_up_before_the_finalizer_is_released() {
    let world = seeded();
    let ctx = world.reconciler();

    let web = world.app("web").await.unwrap();
    let action = reconcile(Arc::new(web), Arc::clone(&ctx)).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));

    let web = world.app("web").await.unwrap();
    assert!(web.finalizers().iter().any(|f| f == APP_FINALIZER));
    assert_eq!(world.target_charts.snapshot().len(), 1);

    world.apps.delete(&ObjectKey::of(&web)).await.unwrap();
    let terminating = world.app("web").await.expect("held back by the finalizer");
    assert!(terminating.metadata.deletion_timestamp.is_some());

    let action = reconcile(Arc::new(terminating), Arc::clone(&ctx))
        .await
        .unwrap();
    assert_eq!(action, Action::await_change());

    assert!(world.app("web").await.is_none());
    assert!(world.target_charts.snapshot().is_empty());
    assert!(world.target_config_maps.snapshot().is_empty());
    assert!(world.target_secrets.snapshot().is_empty());
    assert_eq!(world.target_namespaces.snapshot().len(), 2);
}

#[tokio::test]
async fn failing_target_write_is_an_error() {
    let world = seeded();
    world
        .target_charts
        .fail_on(app_operator::store::memory::Operation::Create, "web");
    let ctx = world.reconciler();
    let web = world.app("web").await.unwrap();

    assert!(reconcile_app(&web, &ctx, false).await.is_err());
    world.target_charts.clear_failures();
    let web = world.app("web").await.unwrap();
    let outcome = reconcile_app(&web, &ctx, false).await.unwrap();
    assert_eq!(stage(&outcome, "chart"), Some(Applied::Created));
}

#[tokio::test]
async fn deleted_app_with_unresolvable_target_releases_its_finalizer() {
    let world = seeded();
    let ctx = world.reconciler();
    let web = world.app("web").await.unwrap();
    reconcile(Arc::new(web), Arc::clone(&ctx)).await.unwrap();

    let unresolvable = Arc::new(Reconciler {
        targets: Arc::new(MissingKubeconfig),
        ..(*ctx).clone()
    });

    // A live App keeps retrying
    let web = world.app("web").await.unwrap();
    let action = reconcile(Arc::new(web.clone()), Arc::clone(&unresolvable))
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    assert!(world.app("web").await.unwrap().finalizers().iter().any(|f| f == APP_FINALIZER));

    world.apps.delete(&ObjectKey::of(&web)).await.unwrap();
    let terminating = world.app("web").await.expect("held back by the finalizer");
    let action = reconcile(Arc::new(terminating), Arc::clone(&unresolvable))
        .await
        .unwrap();
    assert_eq!(action, Action::await_change());
    assert!(world.app("web").await.is_none());

    let last = world.events.events().pop().expect("event");
    assert_eq!(last.1.severity, EventSeverity::Warning);
    assert_eq!(last.1.reason, "TargetUnavailable");
}
