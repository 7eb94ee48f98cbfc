//! capgridd: the capgrid daemon.
//!
//! Runs the feedback control loop that sizes a cluster to its load:
//! - per-node PI admission controllers
//! - node lifecycle tracking against live membership
//! - global scale-up / debounced scale-down
//! - capacity-gated job dispatch
//!
//! # Usage
//!
//! ```text
//! capgridd run --config capgrid.toml
//! capgridd sweep --config capgrid.toml --node node1 --max-pods 6
//! capgridd node remove node2
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use capgrid_cluster::{ClusterApi, InMemoryCluster, KubeClient, WorkloadScope};
use capgrid_core::{CapgridConfig, parse_duration};
use capgrid_dispatch::JobQueue;
use capgrid_metrics::write_sweep_csv;
use capgrid_registry::ClusterRegistry;
use capgridd::{ControlLoop, ForcedAction, SweepPlan, force_node, run_sweep};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "capgridd", about = "capgrid autoscaling daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "capgrid.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop until interrupted.
    Run {
        /// Drive an in-memory cluster built from the inventory instead of
        /// the API server.
        #[arg(long)]
        dry_run: bool,
    },
    /// Measure utilization against pod count for controller tuning.
    Sweep {
        /// Stress a single node instead of the whole cluster.
        #[arg(long)]
        node: Option<String>,

        /// Largest pod count to measure (the sweep starts at 2).
        #[arg(long, default_value = "5")]
        max_pods: u32,

        /// Sampling window per pod count.
        #[arg(long, default_value = "30s", value_parser = parse_duration)]
        duration: Duration,

        /// Interval between utilization samples.
        #[arg(long, default_value = "5s", value_parser = parse_duration)]
        interval: Duration,

        /// CSV output path. Defaults to a file in the export directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Force a node addition or removal.
    Node {
        #[command(subcommand)]
        action: NodeCommand,
    },
}

#[derive(Subcommand)]
enum NodeCommand {
    /// Add an inactive inventory node.
    Add { name: String },
    /// Drain and remove an active worker node.
    Remove { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,capgridd=debug,capgrid=debug")
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = CapgridConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!(
        config = %cli.config.display(),
        nodes = config.nodes.len(),
        "configuration loaded"
    );

    match cli.command {
        Command::Run { dry_run } => run(config, dry_run).await,
        Command::Sweep {
            node,
            max_pods,
            duration,
            interval,
            output,
        } => sweep(config, node, max_pods, duration, interval, output).await,
        Command::Node { action } => node_action(config, action).await,
    }
}

fn connect(config: &CapgridConfig, dry_run: bool) -> anyhow::Result<Box<dyn ClusterApi>> {
    if dry_run {
        warn!("dry run: using an in-memory cluster built from the inventory");
        return Ok(Box::new(InMemoryCluster::from_inventory(&config.nodes)));
    }
    let client = KubeClient::new(&config.api).context("building API client")?;
    info!(server = %client.base_url(), "API client ready");
    Ok(Box::new(client))
}

async fn run(config: CapgridConfig, dry_run: bool) -> anyhow::Result<()> {
    info!("capgrid daemon starting");

    let api = connect(&config, dry_run)?;
    let queue = JobQueue::load(&config.dispatch.jobs_file).context("loading job queue")?;
    let mut control = ControlLoop::from_config(&config, queue);

    // ── Shutdown signal ────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for Ctrl-C, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    let report = control
        .run(api.as_ref(), config.cycle.poll_interval, shutdown_rx)
        .await;

    info!(
        cycles = report.cycles,
        exported = report.exported.len(),
        cleaned = report.cleanup.drained.len(),
        "capgrid daemon stopped"
    );
    Ok(())
}

async fn sweep(
    config: CapgridConfig,
    node: Option<String>,
    max_pods: u32,
    duration: Duration,
    interval: Duration,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let scope = match &node {
        None => WorkloadScope::Cluster,
        Some(name) => {
            let spec = config
                .nodes
                .iter()
                .find(|n| &n.name == name)
                .with_context(|| format!("node {name} is not in the inventory"))?;
            WorkloadScope::Node {
                node_name: spec.name.clone(),
                node_type: spec.labels.node_type.clone(),
            }
        }
    };
    let output = output.unwrap_or_else(|| default_sweep_path(&config.export.dir, node.as_deref()));

    let api = connect(&config, false)?;
    let plan = SweepPlan {
        scope,
        namespace: config.dispatch.namespace.clone(),
        image: config.dispatch.image.clone(),
        max_pods,
        duration,
        sample_interval: interval,
        ready_timeout: config.dispatch.ready_timeout,
        ready_poll: config.dispatch.ready_poll,
    };
    info!(scope = ?plan.scope, max_pods, ?duration, "sweep starting");

    let points = run_sweep(api.as_ref(), &plan).await?;
    write_sweep_csv(&output, &points)?;
    info!(points = points.len(), output = %output.display(), "sweep results written");
    Ok(())
}

fn default_sweep_path(dir: &Path, node: Option<&str>) -> PathBuf {
    match node {
        Some(name) => dir.join(format!("sweep_{name}.csv")),
        None => dir.join("sweep_cluster.csv"),
    }
}

async fn node_action(config: CapgridConfig, command: NodeCommand) -> anyhow::Result<()> {
    let api = connect(&config, false)?;
    let mut registry = ClusterRegistry::from_config(&config);
    let (action, name) = match command {
        NodeCommand::Add { name } => (ForcedAction::Add, name),
        NodeCommand::Remove { name } => (ForcedAction::Remove, name),
    };
    force_node(&mut registry, api.as_ref(), action, &name, Instant::now()).await
}
