//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_opt, env_var_or_default, env_var_or_default_str};
use crate::constants::{self, LABEL_INSTANCE};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the operator runs in
    pub controller_namespace: String,
    /// Sharding instance id. Apps labelled with this id are processed;
    /// without an id, only Apps carrying no instance label are processed.
    pub instance_id: Option<String>,
    /// Namespace searched for a Catalog when the App does not name one
    pub default_catalog_namespace: String,
    /// Most recently created versions kept per chart
    pub max_entries_per_app: usize,
    /// Catalog re-derivation interval (seconds)
    pub catalog_resync_interval_secs: u64,
    /// Periodic App resync interval (seconds)
    pub resync_interval_secs: u64,
    /// Requeue interval after a pass was cancelled (seconds)
    pub cancel_requeue_secs: u64,
    /// Timeout for repository index and metadata downloads (seconds)
    pub http_timeout_secs: u64,
    /// Retries for repository index downloads
    pub http_retries: u32,
    /// Delay before restarting a failed watch loop (seconds)
    pub watch_restart_delay_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_namespace: "app-operator".to_string(),
            instance_id: None,
            default_catalog_namespace: constants::DEFAULT_CATALOG_NAMESPACE.to_string(),
            max_entries_per_app: constants::DEFAULT_MAX_ENTRIES_PER_APP,
            catalog_resync_interval_secs: constants::DEFAULT_CATALOG_RESYNC_INTERVAL_SECS,
            resync_interval_secs: constants::DEFAULT_RESYNC_INTERVAL_SECS,
            cancel_requeue_secs: constants::DEFAULT_CANCEL_REQUEUE_SECS,
            http_timeout_secs: constants::DEFAULT_HTTP_TIMEOUT_SECS,
            http_retries: constants::DEFAULT_HTTP_RETRIES,
            watch_restart_delay_secs: constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            controller_namespace: env_var_or_default_str("POD_NAMESPACE", "app-operator"),
            instance_id: env_var_opt("INSTANCE_ID"),
            default_catalog_namespace: env_var_or_default_str(
                "DEFAULT_CATALOG_NAMESPACE",
                constants::DEFAULT_CATALOG_NAMESPACE,
            ),
            max_entries_per_app: env_var_or_default(
                "MAX_ENTRIES_PER_APP",
                constants::DEFAULT_MAX_ENTRIES_PER_APP,
            ),
            catalog_resync_interval_secs: env_var_or_default(
                "CATALOG_RESYNC_INTERVAL_SECS",
                constants::DEFAULT_CATALOG_RESYNC_INTERVAL_SECS,
            ),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                constants::DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            cancel_requeue_secs: env_var_or_default(
                "CANCEL_REQUEUE_SECS",
                constants::DEFAULT_CANCEL_REQUEUE_SECS,
            ),
            http_timeout_secs: env_var_or_default(
                "HTTP_TIMEOUT_SECS",
                constants::DEFAULT_HTTP_TIMEOUT_SECS,
            ),
            http_retries: env_var_or_default("HTTP_RETRIES", constants::DEFAULT_HTTP_RETRIES),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
        }
    }

    /// Label selector matching the Apps this instance is responsible for
    #[must_use]
    pub fn app_selector(&self) -> String {
        match &self.instance_id {
            Some(id) => format!("{LABEL_INSTANCE}={id}"),
            None => format!("!{LABEL_INSTANCE}"),
        }
    }

    /// Get periodic App resync duration
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get requeue duration for cancelled passes
    pub fn cancel_requeue(&self) -> Duration {
        Duration::from_secs(self.cancel_requeue_secs)
    }

    /// Get Catalog resync duration
    pub fn catalog_resync_interval(&self) -> Duration {
        Duration::from_secs(self.catalog_resync_interval_secs)
    }

    /// Get HTTP request timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_without_instance_excludes_sharded_apps() {
        let config = ControllerConfig::default();
        assert_eq!(config.app_selector(), "!application.octopilot.io/instance");
    }

    #[test]
    fn selector_with_instance_matches_label() {
        let config = ControllerConfig {
            instance_id: Some("blue".to_string()),
            ..ControllerConfig::default()
        };
        assert_eq!(config.app_selector(), "application.octopilot.io/instance=blue");
    }
}
