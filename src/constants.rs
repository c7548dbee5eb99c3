//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of every custom resource owned by the operator
pub const API_GROUP: &str = "application.octopilot.io";

/// Field manager / reporter name used for patches and events
pub const OPERATOR_NAME: &str = "app-operator";

/// Label set on every object the operator creates
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Sharding label selecting the operator instance that processes an App
pub const LABEL_INSTANCE: &str = "application.octopilot.io/instance";

/// Marker label on ConfigMaps/Secrets that at least one App depends on
pub const LABEL_WATCHING: &str = "application.octopilot.io/watching";

/// Catalog type label (`stable`, `community`, ...)
pub const LABEL_CATALOG_TYPE: &str = "application.octopilot.io/catalog-type";

/// Catalog visibility label (`public`, `internal`)
pub const LABEL_CATALOG_VISIBILITY: &str = "application.octopilot.io/catalog-visibility";

/// Catalog type excluded from entry derivation
pub const CATALOG_TYPE_COMMUNITY: &str = "community";

/// Chart name label on AppCatalogEntry objects
pub const LABEL_APP_NAME: &str = "app.kubernetes.io/name";

/// Owning catalog label on AppCatalogEntry objects
pub const LABEL_CATALOG_NAME: &str = "application.octopilot.io/catalog";

/// Marks the single latest entry of a chart
pub const LABEL_LATEST: &str = "latest";

/// Annotation patched on an App when one of its ConfigMaps changes
pub const ANNOTATION_CONFIGMAP_VERSION: &str = "application.octopilot.io/latest-configmap-version";

/// Annotation patched on an App when one of its Secrets changes
pub const ANNOTATION_SECRET_VERSION: &str = "application.octopilot.io/latest-secret-version";

/// Annotation on a repository index entry pointing at its metadata document
pub const ANNOTATION_METADATA_URL: &str = "application.octopilot.io/metadata-url";

/// Finalizer protecting derived objects of an App
pub const APP_FINALIZER: &str = "application.octopilot.io/app";

/// Finalizer protecting AppCatalogEntry objects of a Catalog
pub const CATALOG_FINALIZER: &str = "application.octopilot.io/catalog";

/// Data key holding values YAML in value ConfigMaps/Secrets
pub const VALUES_KEY: &str = "values";

/// Data key holding a kubeconfig in remote-cluster credential Secrets
pub const KUBECONFIG_KEY: &str = "kubeConfig";

/// Release status reported before the installer picked a Chart up
pub const STATUS_NOT_INSTALLED: &str = "not-installed";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8000;

/// Default namespace searched for an App's Catalog
pub const DEFAULT_CATALOG_NAMESPACE: &str = "default";

/// Default number of most recent versions kept per chart
pub const DEFAULT_MAX_ENTRIES_PER_APP: usize = 5;

/// Default Catalog re-derivation interval (seconds)
pub const DEFAULT_CATALOG_RESYNC_INTERVAL_SECS: u64 = 600;

/// Default App resync interval (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Default requeue interval after a cancelled pass (seconds)
pub const DEFAULT_CANCEL_REQUEUE_SECS: u64 = 30;

/// Default timeout for index/metadata downloads (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default number of index download retries
pub const DEFAULT_HTTP_RETRIES: u32 = 3;

/// Default delay before restarting a watch loop after it failed (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
