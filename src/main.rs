//! # App Operator
//!
//! Kubernetes operator that turns `App` resources into release intents
//! (`Chart` objects plus merged values) for an external installer.
//!
//! ## Overview
//!
//! 1. **Reconciling Apps** - namespaces, merged values ConfigMap/Secret,
//!    Chart and App status, in that order
//! 2. **Tracking values** - re-runs an App when a ConfigMap or Secret it
//!    depends on changes
//! 3. **Deriving catalog entries** - publishes a bounded set of chart
//!    versions per Catalog as `AppCatalogEntry` objects
//!
//! Configuration comes from environment variables (see `config`); the
//! flags below override the sharding instance id and the metrics port.

use anyhow::Result;
use app_operator::runtime::{self, initialization::Overrides};
use clap::Parser;

/// App Operator
#[derive(Parser, Debug)]
#[command(name = "app-operator", version, about = "App Operator", long_about = None)]
struct Cli {
    /// Process only Apps labelled with this instance id
    #[arg(long, env = "INSTANCE_ID")]
    instance_id: Option<String>,

    /// Port serving /metrics, /healthz and /readyz
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let init = runtime::initialization::initialize(Overrides {
        instance_id: cli.instance_id,
        metrics_port: cli.metrics_port,
    })
    .await?;
    runtime::run(init).await;
    Ok(())
}
