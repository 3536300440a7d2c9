//! Node daemon binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vecraft::{ClusterNode, NodeConfig};

#[derive(Parser)]
#[command(name = "vecraft-node")]
#[command(about = "vecraft replicated coordination node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a cluster node
    Serve {
        /// Node ID (stable across restarts)
        #[arg(long)]
        id: String,

        /// Config file (JSON); CLI flags override its fields
        #[arg(long)]
        config: Option<PathBuf>,

        /// Host shared by the consensus and coordination endpoints
        #[arg(long)]
        host: Option<String>,

        /// Base port (consensus on base*10+1, coordination on base*10+2)
        #[arg(long)]
        base_port: Option<u16>,

        /// Local vector store gRPC address
        #[arg(long)]
        backend_addr: Option<String>,

        /// Data directory for Raft state
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Bootstrap as the first node of a new cluster
        #[arg(long)]
        bootstrap: bool,

        /// Seed coordination endpoints to join through (comma-separated)
        #[arg(long, value_delimiter = ',')]
        join: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            config,
            host,
            base_port,
            backend_addr,
            data_dir,
            bootstrap,
            join,
        } => {
            let mut node_config = match config {
                Some(path) => NodeConfig::from_file(path)?,
                None => NodeConfig {
                    node_id: id.clone(),
                    host: "127.0.0.1".to_string(),
                    base_port: 0,
                    backend_addr: String::new(),
                    data_dir: PathBuf::from("./data"),
                    bootstrap: false,
                    seeds: vec![],
                    apply_timeout_ms: 5_000,
                    heartbeat_interval_ms: 250,
                    snapshot_threshold: 5_000,
                    snapshot_chunk_size: 256 * 1024,
                },
            };

            node_config.node_id = id;
            if let Some(host) = host {
                node_config.host = host;
            }
            if let Some(base_port) = base_port {
                node_config.base_port = base_port;
            }
            if let Some(backend_addr) = backend_addr {
                node_config.backend_addr = backend_addr;
            }
            if let Some(data_dir) = data_dir {
                node_config.data_dir = data_dir;
            }
            if bootstrap {
                node_config.bootstrap = true;
            }
            if !join.is_empty() {
                node_config.seeds = join;
            }

            ClusterNode::new(node_config).serve().await?;
        }
    }

    Ok(())
}
