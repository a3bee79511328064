//! ccmon - cluster cost monitor
//!
//! Creates the workloads of a scaling scenario, fires its scaling events on
//! schedule and records node cost and pending-pod time until the scenario
//! ends or the process is interrupted.

use anyhow::{Context, Result};
use ccmon_lib::cluster::{connect, KubeCluster, KubeNodeFeed, KubePodFeed};
use ccmon_lib::pricing::{PriceTable, PricingOracle};
use ccmon_lib::{HealthRegistry, Scenario, ScenarioRunner};
use clap::Parser;
use crate::config::{LogFormat, MonitorConfig};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

/// Drive a cluster autoscaler through a scenario and record its cost
#[derive(Parser, Debug)]
#[command(name = "ccmon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario file (YAML)
    scenario: PathBuf,

    /// Path to kubeconfig file (inferred when not specified)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Namespace for workloads and the pod watch
    #[arg(long)]
    namespace: Option<String>,

    /// Directory for the telemetry record
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Validate and print the scenario without touching the cluster
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MonitorConfig::load(cli.config.as_deref())?;
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    init_tracing(config.log_format);

    let scenario = Scenario::open(&cli.scenario)
        .with_context(|| format!("Failed to load scenario {}", cli.scenario.display()))?;
    println!("{scenario}");
    if cli.dry_run {
        return Ok(());
    }

    let pricing = Arc::new(PriceTable::new(config.pricing_file.clone()));
    pricing
        .refresh_on_demand()
        .await
        .context("Failed to load on-demand pricing")?;
    pricing
        .refresh_spot()
        .await
        .context("Failed to load spot pricing")?;
    info!(instance_types = pricing.len(), "Pricing loaded");

    let client = connect(cli.kubeconfig.as_deref()).await?;
    let cluster = Arc::new(KubeCluster::new(client.clone(), config.namespace.clone()));
    let nodes = Arc::new(KubeNodeFeed::new(client.clone(), scenario.node_selector.clone()));
    let pods = Arc::new(KubePodFeed::new(client, &config.namespace));

    let health = HealthRegistry::new();
    if let Some(port) = config.metrics_port {
        let health = health.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, health).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    let (interrupt, interrupted) = broadcast::channel(1);
    let stop = shutdown_signal().context("installing signal handlers")?;
    tokio::spawn(forward_interrupt(stop, interrupt));

    let runner = ScenarioRunner::new(
        config.runner_config(),
        cluster.clone(),
        cluster,
        nodes,
        pods,
        pricing,
    )
    .with_health(health);

    let summary = runner.execute(&scenario, interrupted).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Install SIGINT and SIGTERM handlers; the returned future resolves with
/// the name of whichever arrives first
fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    Ok(async move {
        let ctrl_c = async {
            match signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(e) => {
                    error!(error = %e, "Failed to install Ctrl+C handler");
                    std::future::pending().await
                }
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            terminate.recv().await;
            "SIGTERM"
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<&'static str>();

        tokio::select! {
            name = ctrl_c => name,
            name = terminate => name,
        }
    })
}

async fn forward_interrupt<F>(stop: F, interrupt: broadcast::Sender<()>)
where
    F: Future<Output = &'static str>,
{
    let signal = stop.await;
    info!(signal, "Interrupt received, stopping scenario");
    let _ = interrupt.send(());
}
