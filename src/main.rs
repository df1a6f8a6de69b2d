//! Pool Reconciler
//!
//! Command-line entry point. `plan` prints the expected state of every pool
//! in a snapshot; `simulate` reconciles the snapshot against an in-memory
//! provider and prints the resulting snapshot.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pool_reconciler::{
    ClusterDriver, ClusterSnapshot, Error, InMemoryProvider, InMemoryProviderConfig,
    ReconcileMetrics, ReconcilerConfig, ReconcilerRegistry, Session, StructuralComparator,
    TemplateRenderer,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pool Reconciler - Declarative reconciliation of cloud compute pools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Reconciler configuration file (YAML)
    #[arg(long, env = "RECONCILER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the expected description of every pool as JSON
    Plan {
        /// Cluster snapshot file (YAML)
        #[arg(long, short)]
        snapshot: PathBuf,
    },

    /// Reconcile a snapshot against an in-memory provider
    Simulate {
        /// Cluster snapshot file (YAML)
        #[arg(long, short)]
        snapshot: PathBuf,

        /// Directory of bootstrap scripts
        #[arg(long)]
        scripts: Option<PathBuf>,

        /// Tear the cluster down after reconciling it
        #[arg(long)]
        teardown: bool,

        /// Print metrics in Prometheus text format
        #[arg(long)]
        metrics: bool,

        /// Status polls new instances spend in `new` status
        #[arg(long, default_value = "0")]
        boot_polls: u32,

        /// Upper bound in seconds for every retry loop of the run
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!(version = pool_reconciler::VERSION, "Starting pool reconciler");

    let config = match &args.config {
        Some(path) => ReconcilerConfig::load(path)
            .with_context(|| format!("loading reconciler config {}", path.display()))?,
        None => ReconcilerConfig::default(),
    };

    let result = match args.command {
        Command::Plan { snapshot } => plan(&snapshot, config).await,
        Command::Simulate {
            snapshot,
            scripts,
            teardown,
            metrics,
            boot_polls,
            deadline_secs,
        } => {
            let options = SimulateOptions {
                scripts,
                teardown,
                metrics,
                boot_polls,
                deadline: deadline_secs.map(Duration::from_secs),
            };
            simulate(&snapshot, config, options).await
        }
    };

    if let Err(e) = &result {
        match e.downcast_ref::<Error>() {
            Some(err) => error!(
                error = %err,
                action = ?err.action(),
                retryable = err.is_retryable(),
                transient = err.is_transient(),
                "Reconciliation failed"
            ),
            None => error!(error = %e, "Reconciliation failed"),
        }
    }
    result
}

// =============================================================================
// Commands
// =============================================================================

async fn plan(path: &Path, config: ReconcilerConfig) -> anyhow::Result<()> {
    let snapshot = load_snapshot(path)?;
    let session = Session::new(
        Arc::new(InMemoryProvider::default()),
        Arc::new(TemplateRenderer::new()),
        Arc::new(StructuralComparator),
    )
    .with_config(config);
    let driver = ClusterDriver::new(ReconcilerRegistry::default(), session);

    let planned = driver.plan(&snapshot).await?;
    println!("{}", serde_json::to_string_pretty(&planned)?);
    Ok(())
}

struct SimulateOptions {
    scripts: Option<PathBuf>,
    teardown: bool,
    metrics: bool,
    boot_polls: u32,
    deadline: Option<Duration>,
}

async fn simulate(
    path: &Path,
    config: ReconcilerConfig,
    options: SimulateOptions,
) -> anyhow::Result<()> {
    let snapshot = load_snapshot(path)?;

    let renderer = match &options.scripts {
        Some(dir) => TemplateRenderer::load_dir(dir)
            .with_context(|| format!("loading bootstrap scripts from {}", dir.display()))?,
        None => placeholder_renderer(&snapshot),
    };
    if snapshot.provider_config.components.overlay_network {
        warn!("Overlay network enabled but the simulator has no remote transport");
    }

    let provider = Arc::new(InMemoryProvider::new(InMemoryProviderConfig {
        boot_polls: options.boot_polls,
        ..Default::default()
    }));
    let metrics = Arc::new(ReconcileMetrics::new()?);

    let mut session = Session::new(
        provider.clone(),
        Arc::new(renderer),
        Arc::new(StructuralComparator),
    )
    .with_config(config)
    .with_metrics(metrics.clone());
    if let Some(deadline) = options.deadline {
        session = session.with_deadline(tokio::time::Instant::now() + deadline);
    }
    let driver = ClusterDriver::new(ReconcilerRegistry::default(), session);

    let report = driver.reconcile(&snapshot).await?;
    for outcome in &report.pools {
        info!(
            pool = %outcome.pool,
            role = %outcome.role,
            changed = outcome.changed,
            count = outcome.resource.count,
            "Pool reconciled"
        );
    }
    print!("{}", report.snapshot.to_yaml()?);

    if options.teardown {
        let torn = driver.teardown(&report.snapshot).await?;
        info!(remaining = provider.instances().await.len(), "Teardown finished");
        println!("---");
        print!("{}", torn.to_yaml()?);
    }

    if options.metrics {
        println!("---");
        print!("{}", metrics.encode()?);
    }
    Ok(())
}

fn load_snapshot(path: &Path) -> anyhow::Result<ClusterSnapshot> {
    ClusterSnapshot::load(path)
        .with_context(|| format!("loading cluster snapshot {}", path.display()))
}

/// Renderer with an inert script for every script the snapshot names
fn placeholder_renderer(snapshot: &ClusterSnapshot) -> TemplateRenderer {
    warn!("No bootstrap script directory given, rendering placeholder scripts");
    snapshot
        .pools
        .iter()
        .flat_map(|pool| pool.bootstrap_scripts.iter())
        .fold(TemplateRenderer::new(), |renderer, name| {
            renderer.with_script(name.clone(), format!("# {}\n", name))
        })
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("minijinja=warn".parse()?);

    // Logs go to stderr so command output stays parseable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}
