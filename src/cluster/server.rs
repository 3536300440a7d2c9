//! Node orchestration: wires the stores, consensus core and both gRPC
//! servers together and runs them until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tonic::transport::Server;

use crate::backend::{BackendClient, CollectionCatalog};
use crate::client::{ClientConfig, ClusterClient};
use crate::cluster::filter::LeaderRedirectLayer;
use crate::cluster::service::CoordinationService;
use crate::common::{Error, NodeConfig, Result};
use crate::consensus::network::TransportService;
use crate::consensus::{ConsensusNode, ReplicaStore};

pub struct ClusterNode {
    config: NodeConfig,
}

/// A running node. Dropping the handle does not stop the servers; call
/// [`NodeHandle::shutdown`].
pub struct NodeHandle {
    pub consensus: Arc<ConsensusNode>,
    pub catalog: CollectionCatalog,
    pub backend: BackendClient,
    tasks: Vec<JoinHandle<()>>,
}

impl ClusterNode {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Start the consensus core and both gRPC servers, returning a handle.
    pub async fn start(self) -> Result<NodeHandle> {
        let config = self.config;
        config.validate()?;

        tracing::info!("Starting node: {}", config.node_id);
        tracing::info!("  Consensus endpoint: {}", config.consensus_addr());
        tracing::info!("  Coordination endpoint: {}", config.coordination_addr());
        tracing::info!("  Backend: {}", config.backend_addr);
        tracing::info!("  Data directory: {}", config.node_data_dir().display());
        tracing::info!("  Bootstrap: {}", config.bootstrap);

        let backend = BackendClient::connect_lazy(&config.backend_addr)?;
        let catalog = CollectionCatalog::new();
        let store = ReplicaStore::open(
            &config.node_data_dir(),
            backend.clone(),
            catalog.clone(),
            config.snapshot_chunk_size,
        )?;

        let consensus = Arc::new(ConsensusNode::new(&config, store).await?);
        if config.bootstrap {
            consensus.bootstrap().await?;
        }

        let consensus_sock: SocketAddr = config
            .consensus_addr()
            .parse()
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", config.consensus_addr(), e)))?;
        let coordination_sock: SocketAddr = config
            .coordination_addr()
            .parse()
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", config.coordination_addr(), e)))?;

        let mut tasks = Vec::new();

        // Peer-to-peer Raft transport
        let transport = TransportService::new(consensus.raft().clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = Server::builder()
                .add_service(transport.into_server())
                .serve(consensus_sock)
                .await
            {
                tracing::error!("consensus transport server error: {}", e);
            }
        }));

        // Client-facing coordination service, behind the redirect filter
        let service = CoordinationService::new(
            consensus.clone(),
            backend.clone(),
            catalog.clone(),
            config.apply_timeout(),
        );
        let filter = LeaderRedirectLayer::new(consensus.clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = Server::builder()
                .layer(filter)
                .add_service(service.into_server())
                .serve(coordination_sock)
                .await
            {
                tracing::error!("coordination server error: {}", e);
            }
        }));

        // A fresh non-bootstrap node with seeds asks the cluster to adopt it.
        if !config.bootstrap && !config.seeds.is_empty() {
            tasks.push(tokio::spawn(join_via_seeds(
                config.node_id.clone(),
                config.consensus_addr(),
                config.seeds.clone(),
            )));
        }

        tracing::info!("Node {} ready", config.node_id);

        Ok(NodeHandle {
            consensus,
            catalog,
            backend,
            tasks,
        })
    }

    /// Run until interrupted.
    pub async fn serve(self) -> Result<()> {
        let node_id = self.config.node_id.clone();
        let handle = self.start().await?;

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::Internal(format!("failed to listen for shutdown: {}", e)))?;

        tracing::info!("[{}] shutting down", node_id);
        handle.shutdown().await?;
        tracing::info!("[{}] shutdown complete", node_id);
        Ok(())
    }
}

impl NodeHandle {
    pub async fn shutdown(self) -> Result<()> {
        self.consensus.shutdown().await?;
        for task in &self.tasks {
            task.abort();
        }
        Ok(())
    }
}

/// Ask a seed (or whoever it redirects to) to add this node as a voter.
/// Retries until the cluster has a leader willing to adopt us.
async fn join_via_seeds(node_id: String, consensus_addr: String, seeds: Vec<String>) {
    let client = match ClusterClient::new(ClientConfig {
        seeds: seeds.clone(),
        ..Default::default()
    }) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid seed configuration, cannot join");
            return;
        }
    };

    for attempt in 1..=30u32 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        match client.join_cluster(&node_id, &consensus_addr).await {
            Ok(resp) if resp.success => {
                tracing::info!(leader_id = %resp.leader_id, "joined cluster");
                return;
            }
            Ok(resp) => {
                tracing::warn!(attempt, message = %resp.message, "join rejected, retrying");
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "join attempt failed, retrying");
            }
        }
    }
    tracing::error!("giving up joining the cluster after 30 attempts");
}
