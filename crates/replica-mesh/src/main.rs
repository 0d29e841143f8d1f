//! replica-meshd - Replica Mesh peer network daemon
//!
//! Keeps the local peer catalog in sync with the directory, probes peers on
//! a schedule, and answers replica placement queries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use replica_mesh::{
    Classification, Directory, FileDirectory, MeshConfig, PeerNetworkManager, StaticDirectory,
    TcpProber,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "replica-meshd")]
#[command(about = "Replica Mesh peer network daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery and health monitoring until interrupted
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/replica-mesh/config.json")]
        config: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/replica-mesh/config.json")]
        output: PathBuf,

        /// Local node id (random if omitted)
        #[arg(long)]
        node_id: Option<String>,
    },

    /// Run one discovery cycle and print a replica plan as JSON
    Plan {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/replica-mesh/config.json")]
        config: PathBuf,

        /// Team owning the content
        #[arg(long)]
        team: String,

        /// Content classification
        #[arg(long, default_value = "UNCLASSIFIED")]
        classification: Classification,

        /// Replicas wanted
        #[arg(long, default_value_t = 3)]
        replicas: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("replica_mesh=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run_daemon(config).await?;
        }

        Commands::InitConfig { output, node_id } => {
            init_config(output, node_id)?;
        }

        Commands::Plan {
            config,
            team,
            classification,
            replicas,
        } => {
            plan(config, team, classification, replicas).await?;
        }
    }

    Ok(())
}

fn build_manager(config_path: &Path) -> anyhow::Result<PeerNetworkManager> {
    let config = MeshConfig::from_file(config_path)?;
    info!(
        config = %config_path.display(),
        local_node = %config.local_node.id,
        "loaded config"
    );

    // relative directory paths are resolved against the config file
    let directory: Arc<dyn Directory> = match &config.directory_path {
        Some(path) if path.is_relative() => {
            let base = config_path.parent().unwrap_or_else(|| Path::new("."));
            Arc::new(FileDirectory::new(base.join(path)))
        }
        Some(path) => Arc::new(FileDirectory::new(path)),
        None => Arc::new(StaticDirectory::unavailable()),
    };
    Ok(PeerNetworkManager::from_config(
        &config,
        directory,
        Arc::new(TcpProber::new()),
    )?)
}

async fn run_daemon(config_path: PathBuf) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting replica-meshd");

    let manager = build_manager(&config_path)?;
    manager.start()?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    manager.destroy();

    let stats = manager.network_stats().await;
    info!(
        peers = stats.catalog.total_peers,
        blacklisted = stats.catalog.blacklisted_peers,
        "replica-meshd stopped"
    );
    Ok(())
}

fn init_config(output: PathBuf, node_id: Option<String>) -> anyhow::Result<()> {
    let node_id = node_id.unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4()));
    let config = MeshConfig::sample(&node_id);

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    config.save(&output)?;

    println!("Config written to {}", output.display());
    println!("Local node id: {node_id}");
    Ok(())
}

async fn plan(
    config_path: PathBuf,
    team: String,
    classification: Classification,
    replicas: usize,
) -> anyhow::Result<()> {
    let manager = build_manager(&config_path)?;
    let report = manager.run_discovery_cycle().await;
    info!(
        discovered = report.discovered,
        rejected = report.rejected,
        "discovery finished"
    );

    let plan = manager.find_optimal_peers(&team, classification, replicas);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
