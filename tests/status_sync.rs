//! # Status Sync Tests
//!
//! Chart release status mirrored onto Apps.

mod common;

use app_operator::constants::{LABEL_INSTANCE, LABEL_MANAGED_BY, OPERATOR_NAME};
use app_operator::controller::status_sync::StatusSynchronizer;
use app_operator::crd::{
    AppStatus, Chart, ChartReleaseStatus, ChartSpec, ChartStatus, ReleaseStatus,
};
use common::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn synchronizer(world: &World) -> StatusSynchronizer {
    StatusSynchronizer {
        charts: Arc::new(world.target_charts.clone()),
        apps: Arc::new(world.apps.clone()),
        config: Arc::clone(&world.config),
    }
}

fn deployed_chart(name: &str, status: &str) -> Chart {
    let mut chart = Chart::new(
        name,
        ChartSpec {
            name: name.to_string(),
            namespace: "web".to_string(),
            version: "1.2.3".to_string(),
            tarball_url: format!("{STORAGE_URL}nginx-1.2.3.tgz"),
            ..ChartSpec::default()
        },
    );
    chart.metadata.namespace = Some(NAMESPACE.to_string());
    chart.metadata.labels = Some(BTreeMap::from([(
        LABEL_MANAGED_BY.to_string(),
        OPERATOR_NAME.to_string(),
    )]));
    chart.status = Some(ChartStatus {
        app_version: "1.25.0".to_string(),
        version: "1.2.3".to_string(),
        release: ChartReleaseStatus {
            status: status.to_string(),
            reason: String::new(),
            last_deployed: Some("2024-05-01T10:00:00Z".to_string()),
            revision: Some(1),
        },
    });
    chart
}

#[tokio::test]
async fn chart_status_is_copied_onto_the_app() {
    let world = World::new();
    world.apps.seed(app("web", "stable"));
    let chart = world.target_charts.seed(deployed_chart("web", "deployed"));
    let sync = synchronizer(&world);

    assert!(sync.sync_chart(&chart).await.unwrap());
    let status = world.app("web").await.unwrap().status.unwrap();
    assert_eq!(status.app_version, "1.25.0");
    assert_eq!(status.version, "1.2.3");
    assert_eq!(status.release.status, "deployed");
    assert_eq!(
        status.release.last_deployed.as_deref(),
        Some("2024-05-01T10:00:00Z")
    );

    // Nothing changed since
    assert!(!sync.sync_chart(&chart).await.unwrap());
}

#[tokio::test]
async fn observed_generation_is_left_alone() {
    let world = World::new();
    let mut web = app("web", "stable");
    web.status = Some(AppStatus {
        release: ReleaseStatus {
            status: "pending-install".to_string(),
            ..ReleaseStatus::default()
        },
        observed_generation: Some(3),
        ..AppStatus::default()
    });
    world.apps.seed(web);
    let chart = world.target_charts.seed(deployed_chart("web", "failed"));

    assert!(synchronizer(&world).sync_chart(&chart).await.unwrap());
    let status = world.app("web").await.unwrap().status.unwrap();
    assert_eq!(status.release.status, "failed");
    assert_eq!(status.observed_generation, Some(3));
}

#[tokio::test]
async fn chart_without_app_is_ignored() {
    let world = World::new();
    let chart = world.target_charts.seed(deployed_chart("orphan", "deployed"));

    assert!(!synchronizer(&world).sync_chart(&chart).await.unwrap());
}

#[tokio::test]
async fn apps_of_other_instances_are_not_touched() {
    let world = World::new();
    let mut web = app("web", "stable");
    web.metadata.labels = Some(BTreeMap::from([(
        LABEL_INSTANCE.to_string(),
        "shard-b".to_string(),
    )]));
    world.apps.seed(web);
    let chart = world.target_charts.seed(deployed_chart("web", "deployed"));

    assert!(!synchronizer(&world).sync_chart(&chart).await.unwrap());
    assert!(world.app("web").await.unwrap().status.is_none());

    world.config.write().await.instance_id = Some("shard-b".to_string());
    assert!(synchronizer(&world).sync_chart(&chart).await.unwrap());
}
