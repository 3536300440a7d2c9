//! Client-facing coordination service.
//!
//! Identical on every node: writes are serialized into commands and pushed
//! through consensus (the redirect filter guarantees this node is leader by
//! the time a write handler runs, short of a race with leadership loss),
//! reads go straight to the local replica, membership calls drive voter
//! changes, and `GetClusterInfo` reports the committed configuration.

use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status};

use crate::backend::{BackendClient, CollectionCatalog, DistanceFunction};
use crate::common::address;
use crate::consensus::command::{
    Command, CreateCollectionPayload, DeletePayload, DropCollectionPayload, InsertPayload,
};
use crate::consensus::{ConsensusNode, RaftRole};
use crate::proto;
use crate::proto::coordination_server::{Coordination, CoordinationServer};

const MEMBERSHIP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CoordinationService {
    consensus: Arc<ConsensusNode>,
    backend: BackendClient,
    catalog: CollectionCatalog,
    apply_timeout: Duration,
}

impl CoordinationService {
    pub fn new(
        consensus: Arc<ConsensusNode>,
        backend: BackendClient,
        catalog: CollectionCatalog,
        apply_timeout: Duration,
    ) -> Self {
        Self {
            consensus,
            backend,
            catalog,
            apply_timeout,
        }
    }

    pub fn into_server(self) -> CoordinationServer<Self> {
        CoordinationServer::new(self)
    }

    async fn propose(&self, command: Command) -> Result<(bool, String), Status> {
        tracing::info!(
            kind = command.kind(),
            collection = command.collection_name(),
            "proposing command"
        );
        match self.consensus.apply(command, self.apply_timeout).await {
            Ok(resp) => Ok((resp.success, resp.message)),
            Err(e) => Err(e.to_grpc_status()),
        }
    }
}

// Request validation. Rejections here never reach consensus.
fn require_collection_name(name: &str) -> Result<(), Status> {
    if name.is_empty() {
        return Err(Status::invalid_argument("collection_name must not be empty"));
    }
    Ok(())
}

fn parse_distance(s: &str) -> Result<DistanceFunction, Status> {
    s.parse::<DistanceFunction>()
        .map_err(|e| Status::invalid_argument(e))
}

fn require_vector(vector: &[f32]) -> Result<(), Status> {
    if vector.is_empty() {
        return Err(Status::invalid_argument("vector must not be empty"));
    }
    Ok(())
}

fn check_dimension(catalog: &CollectionCatalog, name: &str, len: usize) -> Result<(), Status> {
    if let Some(dim) = catalog.dimension_of(name) {
        if len as i32 != dim {
            return Err(Status::invalid_argument(format!(
                "dimension mismatch: collection {} expects {} dimensions, got {}",
                name, dim, len
            )));
        }
    }
    Ok(())
}

#[tonic::async_trait]
impl Coordination for CoordinationService {
    async fn create_collection(
        &self,
        req: Request<proto::CreateCollectionRequest>,
    ) -> Result<Response<proto::CreateCollectionResponse>, Status> {
        let req = req.into_inner();
        require_collection_name(&req.collection_name)?;
        let distance = parse_distance(&req.distance)?;
        if req.vector_dimension <= 0 {
            return Err(Status::invalid_argument("vector_dimension must be positive"));
        }

        let command = Command::CreateCollection(CreateCollectionPayload {
            collection_name: req.collection_name,
            vector_dimension: req.vector_dimension,
            distance,
            payload_table_schema: req.payload_table_schema,
        });
        let (success, message) = self.propose(command).await?;
        Ok(Response::new(proto::CreateCollectionResponse {
            success,
            message,
        }))
    }

    async fn insert(
        &self,
        req: Request<proto::InsertRequest>,
    ) -> Result<Response<proto::InsertResponse>, Status> {
        let req = req.into_inner();
        require_collection_name(&req.collection_name)?;
        require_vector(&req.vector)?;
        check_dimension(&self.catalog, &req.collection_name, req.vector.len())?;

        let command = Command::Insert(InsertPayload {
            collection_name: req.collection_name,
            id: req.id,
            vector: req.vector,
            payload_insert_query: req.payload_insert_query,
        });
        let (success, message) = self.propose(command).await?;
        Ok(Response::new(proto::InsertResponse { success, message }))
    }

    async fn delete(
        &self,
        req: Request<proto::DeleteRequest>,
    ) -> Result<Response<proto::DeleteResponse>, Status> {
        let req = req.into_inner();
        require_collection_name(&req.collection_name)?;

        let command = Command::Delete(DeletePayload {
            collection_name: req.collection_name,
            id: req.id,
        });
        let (success, message) = self.propose(command).await?;
        Ok(Response::new(proto::DeleteResponse { success, message }))
    }

    async fn drop_collection(
        &self,
        req: Request<proto::DropCollectionRequest>,
    ) -> Result<Response<proto::DropCollectionResponse>, Status> {
        let req = req.into_inner();
        require_collection_name(&req.collection_name)?;

        let command = Command::DropCollection(DropCollectionPayload {
            collection_name: req.collection_name,
        });
        let (success, message) = self.propose(command).await?;
        Ok(Response::new(proto::DropCollectionResponse {
            success,
            message,
        }))
    }

    async fn search(
        &self,
        req: Request<proto::SearchRequest>,
    ) -> Result<Response<proto::SearchResponse>, Status> {
        let req = req.into_inner();
        require_collection_name(&req.collection_name)?;
        require_vector(&req.vector)?;
        if req.top_k == 0 {
            return Err(Status::invalid_argument("top_k must be positive"));
        }

        let results = self
            .backend
            .search(
                &req.collection_name,
                &req.vector,
                req.top_k,
                &req.payload_search_query,
            )
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(results))
    }

    async fn collection_exists(
        &self,
        req: Request<proto::CollectionExistsRequest>,
    ) -> Result<Response<proto::CollectionExistsResponse>, Status> {
        let req = req.into_inner();
        require_collection_name(&req.collection_name)?;

        let exists = self
            .backend
            .collection_exists(&req.collection_name)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(proto::CollectionExistsResponse { exists }))
    }

    async fn get_cluster_info(
        &self,
        _req: Request<proto::GetClusterInfoRequest>,
    ) -> Result<Response<proto::ClusterInfoResponse>, Status> {
        let members = self.consensus.configuration();
        let leader_id = self.consensus.current_leader().unwrap_or_default();
        let leader_addr = self
            .consensus
            .leader_coordination_addr()
            .unwrap_or_default();

        let nodes = members
            .into_iter()
            .map(|m| {
                let state = if m.node_id == leader_id {
                    RaftRole::Leader
                } else if m.node_id == self.consensus.node_id() {
                    self.consensus.state()
                } else {
                    RaftRole::Follower
                };
                proto::NodeInfo {
                    node_id: m.node_id,
                    addr: m.consensus_addr,
                    state: state.to_string(),
                    is_voter: m.is_voter,
                }
            })
            .collect();

        Ok(Response::new(proto::ClusterInfoResponse {
            leader_id,
            leader_addr,
            state: self.consensus.state().to_string(),
            nodes,
        }))
    }

    async fn join_cluster(
        &self,
        req: Request<proto::JoinClusterRequest>,
    ) -> Result<Response<proto::JoinClusterResponse>, Status> {
        let req = req.into_inner();
        if req.node_id.is_empty() {
            return Err(Status::invalid_argument("node_id must not be empty"));
        }
        // The joiner advertises its consensus endpoint; it must follow the
        // port convention or its coordination endpoint cannot be derived.
        address::coordination_from_consensus(&req.node_addr)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        tracing::info!(node_id = %req.node_id, addr = %req.node_addr, "adding node to cluster");

        match self
            .consensus
            .add_voter(req.node_id.clone(), req.node_addr, MEMBERSHIP_TIMEOUT)
            .await
        {
            Ok(()) => {
                tracing::info!(node_id = %req.node_id, "node joined cluster");
                Ok(Response::new(proto::JoinClusterResponse {
                    success: true,
                    message: "joined cluster successfully".to_string(),
                    leader_id: self.consensus.node_id().to_string(),
                }))
            }
            Err(e) => {
                tracing::warn!(node_id = %req.node_id, error = %e, "join failed");
                Err(e.to_grpc_status())
            }
        }
    }

    async fn leave_cluster(
        &self,
        req: Request<proto::LeaveClusterRequest>,
    ) -> Result<Response<proto::LeaveClusterResponse>, Status> {
        let req = req.into_inner();
        if req.node_id.is_empty() {
            return Err(Status::invalid_argument("node_id must not be empty"));
        }

        tracing::info!(node_id = %req.node_id, "removing node from cluster");

        match self
            .consensus
            .remove_server(req.node_id.clone(), MEMBERSHIP_TIMEOUT)
            .await
        {
            Ok(()) => Ok(Response::new(proto::LeaveClusterResponse {
                success: true,
                message: "left cluster successfully".to_string(),
            })),
            Err(e) => {
                tracing::warn!(node_id = %req.node_id, error = %e, "leave failed");
                Err(e.to_grpc_status())
            }
        }
    }
}
