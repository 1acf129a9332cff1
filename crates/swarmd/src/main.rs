//! swarmd binary entry point.
//!
//! # Usage
//!
//! ```text
//! swarmd manage consul://10.0.0.5:8500/swarmgrid --strategy binpack
//! swarmd join --advertise 10.0.0.7:2375 consul://10.0.0.5:8500/swarmgrid
//! swarmd list nodes://10.0.0.1:2375,10.0.0.2:2375
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swarmd::{DaemonConfig, Manager, run_join};
use swarmgrid_cluster::DockerClient;
use swarmgrid_discovery::{BackendRegistry, DiscoveryEngine};

const DEFAULT_LOG_FILTER: &str =
    "info,swarmd=debug,swarmgrid_discovery=debug,swarmgrid_cluster=debug,swarmgrid_scheduler=debug";

#[derive(Parser)]
#[command(name = "swarmd", about = "SwarmGrid discovery and scheduling daemon")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "SWARMD_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct DiscoveryArgs {
    /// Discovery URI, e.g. consul://10.0.0.5:8500/swarmgrid.
    #[arg(env = "SWARM_DISCOVERY")]
    discovery: Option<String>,

    /// Discovery heartbeat, e.g. "20s".
    #[arg(long)]
    heartbeat: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Watch discovery and schedule containers onto the cluster.
    Manage {
        #[command(flatten)]
        discovery: DiscoveryArgs,

        /// Placement strategy (spread, binpack, random).
        #[arg(long)]
        strategy: Option<String>,

        /// Filter to apply; repeat for a chain. Replaces the configured list.
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Capacity overcommit ratio.
        #[arg(long)]
        overcommit: Option<f64>,

        /// Container record database.
        #[arg(long)]
        store: Option<PathBuf>,

        /// Retry queue interval, e.g. "5s".
        #[arg(long)]
        retry_interval: Option<String>,

        /// Container runtime request timeout.
        #[arg(long)]
        engine_timeout: Option<String>,
    },

    /// Register this node in discovery every heartbeat.
    Join {
        #[command(flatten)]
        discovery: DiscoveryArgs,

        /// Address other nodes reach this one at (host:port).
        #[arg(long, env = "SWARM_ADVERTISE")]
        advertise: String,

        /// Retry queue interval, e.g. "5s".
        #[arg(long)]
        retry_interval: Option<String>,
    },

    /// Print the discovered nodes and exit.
    List {
        #[command(flatten)]
        discovery: DiscoveryArgs,
    },
}

impl DiscoveryArgs {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(uri) = self.discovery {
            config.discovery.uri = Some(uri);
        }
        if let Some(heartbeat) = self.heartbeat {
            config.discovery.heartbeat = heartbeat;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    let registry = BackendRegistry::with_defaults();

    match cli.command {
        Command::Manage {
            discovery,
            strategy,
            filters,
            overcommit,
            store,
            retry_interval,
            engine_timeout,
        } => {
            discovery.apply(&mut config);
            if let Some(strategy) = strategy {
                config.scheduler.strategy = strategy;
            }
            if !filters.is_empty() {
                config.scheduler.filters = filters;
            }
            if let Some(overcommit) = overcommit {
                config.scheduler.overcommit = overcommit;
            }
            if let Some(store) = store {
                config.store.path = Some(store);
            }
            if let Some(interval) = retry_interval {
                config.retry.interval = interval;
            }
            if let Some(timeout) = engine_timeout {
                config.engine.timeout = timeout;
            }
            run_manage(&config, &registry).await
        }
        Command::Join {
            discovery,
            advertise,
            retry_interval,
        } => {
            discovery.apply(&mut config);
            if let Some(interval) = retry_interval {
                config.retry.interval = interval;
            }
            run_join_command(&config, &registry, &advertise).await
        }
        Command::List { discovery } => {
            discovery.apply(&mut config);
            run_list(&config, &registry).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Flip the returned receiver to `true` on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
    shutdown_rx
}

async fn run_manage(config: &DaemonConfig, registry: &BackendRegistry) -> anyhow::Result<()> {
    info!("swarmd starting in manage mode");
    let client = Arc::new(DockerClient::new(config.engine_timeout()?));
    let manager = Manager::build(config, registry, client).await?;
    manager.run(shutdown_on_ctrl_c()).await
}

async fn run_join_command(config: &DaemonConfig, registry: &BackendRegistry, advertise: &str) -> anyhow::Result<()> {
    config.validate()?;
    let heartbeat = config.heartbeat()?;
    let backend = registry
        .create(config.discovery_uri()?, heartbeat)
        .context("discovery backend")?;
    let engine = Arc::new(DiscoveryEngine::new(backend));
    run_join(engine, advertise, heartbeat, config.retry_interval()?, shutdown_on_ctrl_c()).await
}

async fn run_list(config: &DaemonConfig, registry: &BackendRegistry) -> anyhow::Result<()> {
    let backend = registry
        .create(config.discovery_uri()?, config.heartbeat()?)
        .context("discovery backend")?;
    let timeout = config.engine_timeout()?;
    let mut entries = tokio::time::timeout(timeout, backend.fetch())
        .await
        .with_context(|| format!("discovery did not answer within {timeout:?}"))??;
    entries.sort();
    entries.dedup();
    for entry in entries {
        println!("{entry}");
    }
    Ok(())
}
