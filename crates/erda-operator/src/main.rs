//! Erda operator: deploys and continuously reconciles the Erda platform
//! on a Kubernetes cluster.

mod crd;

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::api::Api;
use kube::discovery::Discovery;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Client;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use erda_common::crd::Platform;
use erda_platform::render::ingress::select_strategy;
use erda_platform::{error_policy, reconcile, Context, PlatformKubeClientImpl};

/// Erda operator: reconciles Platform resources into workloads, services,
/// ingresses, and their supporting primitives
#[derive(Parser, Debug)]
#[command(name = "erda-operator", version, about, long_about = None)]
struct Cli {
    /// The address the metric endpoint binds to
    #[arg(long, default_value = ":8080")]
    metrics_bind_address: String,

    /// The address the probe endpoint binds to
    #[arg(long, default_value = ":8081")]
    health_probe_bind_address: String,

    /// Enable leader election for the controller manager
    #[arg(long, default_value_t = false)]
    leader_elect: bool,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// The maximum QPS to the api-server
    #[arg(long, default_value_t = 100.0)]
    qps: f64,

    /// The maximum burst for throttle
    #[arg(long, default_value_t = 100)]
    burst: i32,

    /// The port the operator listens on
    #[arg(long, default_value_t = 9443)]
    listen_port: u16,

    /// Print the Platform CRD manifest and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    if cli.crd {
        println!("{}", serde_yaml::to_string(&crd::crd_document())?);
        return Ok(());
    }

    info!(
        metrics = %cli.metrics_bind_address,
        probes = %cli.health_probe_bind_address,
        leader_elect = cli.leader_elect,
        qps = cli.qps,
        burst = cli.burst,
        listen_port = cli.listen_port,
        "starting erda-operator"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {e}"))?;

    // one capabilities probe at startup decides the ingress API version
    let ingress = match Discovery::new(client.clone()).run().await {
        Ok(discovery) => select_strategy(&discovery),
        Err(err) => {
            warn!(error = %err, "API discovery failed, assuming networking.k8s.io/v1 ingress");
            Box::new(erda_platform::render::ingress::NetworkingV1Strategy::new())
        }
    };

    crd::install(&client)
        .await
        .map_err(|e| anyhow::anyhow!("failed to install Platform CRD: {e}"))?;

    let context = Arc::new(Context {
        client: Arc::new(PlatformKubeClientImpl::new(client.clone())),
        ingress: Arc::from(ingress),
    });

    let platforms: Api<Platform> = Api::all(client);
    info!("watching Platform resources");

    Controller::new(platforms, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => info!(platform = %object.name, "reconciled"),
                Err(err) => warn!(error = %err, "reconcile error"),
            }
        })
        .await;

    info!("controller terminated");
    Ok(())
}
