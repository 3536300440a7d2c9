//! Peer-to-peer Raft transport over gRPC.
//!
//! Both halves of the transport live here: [`RaftTransport`] is the client
//! side handed to the consensus core (one lazily-dialed channel per peer),
//! and [`TransportService`] is the server side listening on the node's
//! consensus endpoint. Raft messages cross the wire as self-describing JSON
//! inside an opaque bytes field, so the gRPC contract does not chase the
//! consensus library's type parameters.

use openraft::error::{InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError};
use openraft::network::RPCOption;
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::{BasicNode, RaftNetwork, RaftNetworkFactory};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::transport::{Channel, Endpoint};

use crate::consensus::{NodeId, TypeConfig, VecRaft};
use crate::proto;
use crate::proto::consensus_transport_client::ConsensusTransportClient;
use crate::proto::consensus_transport_server::{ConsensusTransport, ConsensusTransportServer};

pub struct RaftTransport;

impl RaftTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RaftTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RaftNetworkFactory<TypeConfig> for RaftTransport {
    type Network = RaftPeer;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        RaftPeer {
            target,
            addr: node.addr.clone(),
            client: None,
        }
    }
}

/// A connection to one peer's consensus endpoint.
pub struct RaftPeer {
    target: NodeId,
    addr: String,
    client: Option<ConsensusTransportClient<Channel>>,
}

#[derive(Debug, Clone, Copy)]
enum Route {
    Vote,
    AppendEntries,
    InstallSnapshot,
}

impl RaftPeer {
    fn net_err<N, E>(e: &E) -> RPCError<NodeId, BasicNode, N>
    where
        E: std::error::Error + 'static,
        N: std::error::Error,
    {
        RPCError::Network(NetworkError::new(e))
    }

    fn client<N>(
        &mut self,
    ) -> Result<&mut ConsensusTransportClient<Channel>, RPCError<NodeId, BasicNode, N>>
    where
        N: std::error::Error,
    {
        if self.client.is_none() {
            let endpoint = Endpoint::from_shared(format!("http://{}", self.addr))
                .map_err(|e| Self::net_err(&e))?;
            self.client = Some(ConsensusTransportClient::new(endpoint.connect_lazy()));
        }
        Ok(self.client.as_mut().unwrap())
    }

    /// One round trip: serialize the request, call the peer, deserialize the
    /// remote `Result`. A remote Err is the peer's own Raft error and is
    /// wrapped as such; transport faults become network errors.
    async fn exchange<Req, Resp, E>(
        &mut self,
        route: Route,
        req: Req,
    ) -> Result<Resp, RPCError<NodeId, BasicNode, RaftError<NodeId, E>>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        E: std::error::Error + DeserializeOwned,
    {
        let payload = serde_json::to_vec(&req).map_err(|e| Self::net_err(&e))?;
        let message = proto::RaftMessage { payload };

        let client = self.client()?;
        let reply = match route {
            Route::Vote => client.vote(message).await,
            Route::AppendEntries => client.append_entries(message).await,
            Route::InstallSnapshot => client.install_snapshot(message).await,
        }
        .map_err(|e| Self::net_err(&e))?
        .into_inner();

        let result: Result<Resp, RaftError<NodeId, E>> =
            serde_json::from_slice(&reply.payload).map_err(|e| Self::net_err(&e))?;
        result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target.clone(), e)))
    }
}

impl RaftNetwork<TypeConfig> for RaftPeer {
    async fn append_entries(
        &mut self,
        req: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>>
    {
        self.exchange::<_, _, openraft::error::Infallible>(Route::AppendEntries, req)
            .await
    }

    async fn install_snapshot(
        &mut self,
        req: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>,
    > {
        self.exchange(Route::InstallSnapshot, req).await
    }

    async fn vote(
        &mut self,
        req: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.exchange::<_, _, openraft::error::Infallible>(Route::Vote, req)
            .await
    }
}

/// Server half: feeds inbound peer traffic to the local Raft core.
pub struct TransportService {
    raft: VecRaft,
}

impl TransportService {
    pub fn new(raft: VecRaft) -> Self {
        Self { raft }
    }

    pub fn into_server(self) -> ConsensusTransportServer<Self> {
        ConsensusTransportServer::new(self)
    }

    fn decode<T: DeserializeOwned>(message: proto::RaftMessage) -> Result<T, tonic::Status> {
        serde_json::from_slice(&message.payload)
            .map_err(|e| tonic::Status::invalid_argument(format!("bad raft message: {}", e)))
    }

    fn encode<T: Serialize>(value: &T) -> Result<proto::RaftMessage, tonic::Status> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| tonic::Status::internal(format!("encode raft reply: {}", e)))?;
        Ok(proto::RaftMessage { payload })
    }
}

#[tonic::async_trait]
impl ConsensusTransport for TransportService {
    async fn vote(
        &self,
        req: tonic::Request<proto::RaftMessage>,
    ) -> Result<tonic::Response<proto::RaftMessage>, tonic::Status> {
        let req: VoteRequest<NodeId> = Self::decode(req.into_inner())?;
        let res = self.raft.vote(req).await;
        Ok(tonic::Response::new(Self::encode(&res)?))
    }

    async fn append_entries(
        &self,
        req: tonic::Request<proto::RaftMessage>,
    ) -> Result<tonic::Response<proto::RaftMessage>, tonic::Status> {
        let req: AppendEntriesRequest<TypeConfig> = Self::decode(req.into_inner())?;
        let res = self.raft.append_entries(req).await;
        Ok(tonic::Response::new(Self::encode(&res)?))
    }

    async fn install_snapshot(
        &self,
        req: tonic::Request<proto::RaftMessage>,
    ) -> Result<tonic::Response<proto::RaftMessage>, tonic::Status> {
        let req: InstallSnapshotRequest<TypeConfig> = Self::decode(req.into_inner())?;
        let res = self.raft.install_snapshot(req).await;
        Ok(tonic::Response::new(Self::encode(&res)?))
    }
}
