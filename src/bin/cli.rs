//! Operator and client CLI
//!
//! Talks to any cluster node; writes are transparently retried against the
//! leader by the client runtime.

use clap::{Parser, Subcommand};
use vecraft::client::{ClientConfig, ClusterClient};

#[derive(Parser)]
#[command(name = "vecraft")]
#[command(about = "vecraft cluster CLI")]
#[command(version)]
struct Cli {
    /// Coordination endpoint of any cluster node
    #[arg(long, default_value = "127.0.0.1:5002")]
    addr: String,

    /// Maximum leader redirects to follow per call
    #[arg(long, default_value = "3")]
    max_redirects: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a collection
    CreateCollection {
        /// Collection name
        name: String,

        /// Distance function (cosine, euclidean, inner_product)
        #[arg(long, default_value = "cosine")]
        distance: String,

        /// Vector dimension
        #[arg(long)]
        dimension: i32,

        /// Payload table schema (SQL DDL)
        #[arg(long, default_value = "")]
        schema: String,
    },

    /// Insert a vector
    Insert {
        /// Collection name
        collection: String,

        /// Point id
        #[arg(long)]
        id: i64,

        /// Vector components (comma-separated floats)
        #[arg(long, value_delimiter = ',')]
        vector: Vec<f32>,

        /// Payload insert query (SQL DML)
        #[arg(long, default_value = "")]
        payload: String,
    },

    /// Delete a vector
    Delete {
        /// Collection name
        collection: String,

        /// Point id
        #[arg(long)]
        id: i64,
    },

    /// Drop a collection
    DropCollection {
        /// Collection name
        name: String,
    },

    /// Similarity search
    Search {
        /// Collection name
        collection: String,

        /// Query vector (comma-separated floats)
        #[arg(long, value_delimiter = ',')]
        vector: Vec<f32>,

        /// Number of results
        #[arg(long, default_value = "10")]
        top_k: u32,

        /// Payload search query (SQL SELECT)
        #[arg(long, default_value = "")]
        query: String,
    },

    /// Check whether a collection exists
    Exists {
        /// Collection name
        name: String,
    },

    /// Show cluster membership and leadership
    Info,

    /// Add a node to the cluster
    Join {
        /// Node ID of the joining node
        node_id: String,

        /// Consensus endpoint of the joining node
        node_addr: String,
    },

    /// Remove a node from the cluster
    Leave {
        /// Node ID to remove
        node_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let client = ClusterClient::new(ClientConfig {
        seeds: vec![cli.addr.clone()],
        max_redirects: cli.max_redirects,
        ..Default::default()
    })?;

    match cli.command {
        Commands::CreateCollection {
            name,
            distance,
            dimension,
            schema,
        } => {
            let resp = client
                .create_collection(&name, &distance, dimension, &schema)
                .await?;
            println!("success: {}", resp.success);
            if !resp.message.is_empty() {
                println!("message: {}", resp.message);
            }
        }
        Commands::Insert {
            collection,
            id,
            vector,
            payload,
        } => {
            let resp = client.insert(&collection, id, &vector, &payload).await?;
            println!("success: {}", resp.success);
            if !resp.message.is_empty() {
                println!("message: {}", resp.message);
            }
        }
        Commands::Delete { collection, id } => {
            let resp = client.delete(&collection, id).await?;
            println!("success: {}", resp.success);
        }
        Commands::DropCollection { name } => {
            let resp = client.drop_collection(&name).await?;
            println!("success: {}", resp.success);
        }
        Commands::Search {
            collection,
            vector,
            top_k,
            query,
        } => {
            let resp = client.search(&collection, &vector, top_k, &query).await?;
            for item in resp.results {
                let payload: Vec<String> = item
                    .payload
                    .iter()
                    .map(|kv| format!("{}={}", kv.key, kv.value))
                    .collect();
                println!(
                    "rowid={} distance={:.6} {}",
                    item.rowid,
                    item.distance,
                    payload.join(" ")
                );
            }
        }
        Commands::Exists { name } => {
            println!("{}", client.collection_exists(&name).await?);
        }
        Commands::Info => {
            let info = client.get_cluster_info().await?;
            println!("leader: {} ({})", info.leader_id, info.leader_addr);
            println!("queried node state: {}", info.state);
            for node in info.nodes {
                println!(
                    "  {} {} state={} voter={}",
                    node.node_id, node.addr, node.state, node.is_voter
                );
            }
        }
        Commands::Join { node_id, node_addr } => {
            let resp = client.join_cluster(&node_id, &node_addr).await?;
            println!("success: {} ({})", resp.success, resp.message);
        }
        Commands::Leave { node_id } => {
            let resp = client.leave_cluster(&node_id).await?;
            println!("success: {} ({})", resp.success, resp.message);
        }
    }

    Ok(())
}
