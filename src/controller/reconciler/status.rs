//! # Status Stage
//!
//! Copies the release status reported on the Chart into the App status.

use crate::constants::STATUS_NOT_INSTALLED;
use crate::controller::reconciler::resource::{Change, ManagedResource, Pass};
use crate::controller::reconciler::types::{ReconcilerError, StageError};
use crate::crd::{App, AppStatus, Chart, ReleaseStatus};
use crate::store::ObjectKey;
use async_trait::async_trait;

#[derive(Debug, Default, Clone, Copy)]
pub struct StatusStage;

/// App status mirroring a Chart; an absent Chart means "not installed"
#[must_use]
pub fn status_from_chart(chart: Option<&Chart>) -> AppStatus {
    match chart.and_then(|c| c.status.as_ref()) {
        Some(status) => AppStatus {
            app_version: status.app_version.clone(),
            version: status.version.clone(),
            release: ReleaseStatus {
                status: status.release.status.clone(),
                reason: status.release.reason.clone(),
                last_deployed: status.release.last_deployed.clone(),
            },
            observed_generation: None,
        },
        None if chart.is_some() => AppStatus::default(),
        None => AppStatus {
            release: ReleaseStatus {
                status: STATUS_NOT_INSTALLED.to_string(),
                ..ReleaseStatus::default()
            },
            ..AppStatus::default()
        },
    }
}

/// Whether the release fields (app version, version, release
/// status/reason/last deployed) differ
#[must_use]
pub fn release_fields_differ(current: &AppStatus, desired: &AppStatus) -> bool {
    current.app_version != desired.app_version
        || current.version != desired.version
        || current.release != desired.release
}

#[async_trait]
impl ManagedResource for StatusStage {
    type State = AppStatus;

    fn name(&self) -> &'static str {
        "status"
    }

    async fn current(&self, app: &App, _pass: &Pass<'_>) -> Result<Option<AppStatus>, StageError> {
        Ok(app.status.clone())
    }

    async fn desired(&self, app: &App, pass: &Pass<'_>) -> Result<Option<AppStatus>, StageError> {
        if pass.deleting {
            return Ok(None);
        }
        let key = ObjectKey {
            namespace: app.metadata.namespace.clone(),
            name: app.metadata.name.clone().unwrap_or_default(),
        };
        let chart = pass
            .target
            .charts
            .get(&key)
            .await
            .map_err(|e| pass.target.stage_error(e))?;
        let mut status = status_from_chart(chart.as_ref());
        status.observed_generation = app.metadata.generation;
        Ok(Some(status))
    }

    fn diff(&self, current: Option<AppStatus>, desired: Option<AppStatus>) -> Change<AppStatus> {
        match (current, desired) {
            (_, None) => Change::NoOp,
            (None, Some(desired)) => Change::Create(desired),
            (Some(current), Some(desired)) if current == desired => Change::NoOp,
            (Some(_), Some(desired)) => Change::Update(desired),
        }
    }

    async fn apply(&self, change: Change<AppStatus>, pass: &Pass<'_>) -> Result<(), StageError> {
        let (Change::Create(status) | Change::Update(status)) = change else {
            return Ok(());
        };
        let value = serde_json::to_value(&status)
            .map_err(|e| StageError::Failed(ReconcilerError::ShapeMismatch(e.to_string())))?;
        pass.reconciler.apps.patch_status(&pass.app_key, value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ChartReleaseStatus, ChartSpec, ChartStatus};

    #[test]
    fn absent_chart_reports_not_installed() {
        assert_eq!(status_from_chart(None).release.status, STATUS_NOT_INSTALLED);
    }

    #[test]
    fn chart_status_is_copied() {
        let mut chart = Chart::new("ingress", ChartSpec::default());
        chart.status = Some(ChartStatus {
            app_version: "1.9.4".to_string(),
            version: "4.10.0".to_string(),
            release: ChartReleaseStatus {
                status: "deployed".to_string(),
                reason: String::new(),
                last_deployed: Some("2026-10-01T12:00:00Z".to_string()),
                revision: Some(3),
            },
        });
        let status = status_from_chart(Some(&chart));
        assert_eq!(status.app_version, "1.9.4");
        assert_eq!(status.release.status, "deployed");
        assert!(!release_fields_differ(&status, &status_from_chart(Some(&chart))));
        assert!(release_fields_differ(&status, &AppStatus::default()));
    }
}
