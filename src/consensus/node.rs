//! Consensus node facade.
//!
//! Encapsulates one Raft participant: identity, stores, transport and the
//! state-machine binding. The rest of the system only sees this surface;
//! the underlying library never leaks past this module.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use openraft::error::{ClientWriteError, InitializeError, RaftError};
use openraft::storage::Adaptor;
use openraft::{BasicNode, ServerState, SnapshotPolicy};

use crate::common::{address, Error, NodeConfig, Result};
use crate::consensus::command::{Command, CommandResponse};
use crate::consensus::network::RaftTransport;
use crate::consensus::store::ReplicaStore;
use crate::consensus::{NodeId, VecRaft};

/// Role of this node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Leader,
    Follower,
    Candidate,
    Learner,
    Shutdown,
}

impl fmt::Display for RaftRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaftRole::Leader => write!(f, "Leader"),
            RaftRole::Follower => write!(f, "Follower"),
            RaftRole::Candidate => write!(f, "Candidate"),
            RaftRole::Learner => write!(f, "Learner"),
            RaftRole::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// One record of the committed cluster configuration.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub node_id: NodeId,
    pub consensus_addr: String,
    pub is_voter: bool,
}

pub struct ConsensusNode {
    node_id: NodeId,
    consensus_addr: String,
    raft: VecRaft,
}

impl ConsensusNode {
    pub async fn new(config: &NodeConfig, store: ReplicaStore) -> Result<Self> {
        let raft_config = openraft::Config {
            cluster_name: "vecraft".to_string(),
            heartbeat_interval: config.heartbeat_interval_ms,
            election_timeout_min: config.heartbeat_interval_ms * 3,
            election_timeout_max: config.heartbeat_interval_ms * 6,
            snapshot_policy: SnapshotPolicy::LogsSinceLast(config.snapshot_threshold),
            max_in_snapshot_log_to_keep: 0,
            ..Default::default()
        };

        let (log_store, state_machine) = Adaptor::new(store);
        let raft = VecRaft::new(
            config.node_id.clone(),
            raft_config.into(),
            RaftTransport::new(),
            log_store,
            state_machine,
        )
        .await
        .map_err(|e| Error::Raft(e.to_string()))?;

        Ok(Self {
            node_id: config.node_id.clone(),
            consensus_addr: config.consensus_addr(),
            raft,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn consensus_addr(&self) -> &str {
        &self.consensus_addr
    }

    /// The wrapped Raft handle, for the peer transport server only.
    pub fn raft(&self) -> &VecRaft {
        &self.raft
    }

    /// Initialize a single-node cluster containing exactly this node.
    /// Re-bootstrapping an initialized node is a no-op.
    pub async fn bootstrap(&self) -> Result<()> {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            self.node_id.clone(),
            BasicNode {
                addr: self.consensus_addr.clone(),
            },
        );

        match self.raft.initialize(nodes).await {
            Ok(()) => {
                tracing::info!(node_id = %self.node_id, "cluster bootstrapped");
                Ok(())
            }
            Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                tracing::debug!(node_id = %self.node_id, "already bootstrapped, skipping");
                Ok(())
            }
            Err(e) => Err(Error::Raft(e.to_string())),
        }
    }

    /// Submit a command to the replicated log. Resolves once the entry is
    /// committed and applied locally. A deadline expiry means the outcome is
    /// unknown: the command may still commit later.
    pub async fn apply(&self, command: Command, timeout: Duration) -> Result<CommandResponse> {
        match tokio::time::timeout(timeout, self.raft.client_write(command)).await {
            Err(_) => Err(Error::ConsensusTimeout),
            Ok(Ok(resp)) => Ok(resp.data),
            Ok(Err(e)) => Err(self.map_write_error(e)),
        }
    }

    /// Add a node as a full voting member. Leader-only.
    ///
    /// The node is first added as a learner and caught up (by snapshot if
    /// necessary), then promoted to voter in a second membership change.
    pub async fn add_voter(
        &self,
        node_id: NodeId,
        consensus_addr: String,
        timeout: Duration,
    ) -> Result<()> {
        let fut = async {
            self.raft
                .add_learner(
                    node_id.clone(),
                    BasicNode {
                        addr: consensus_addr,
                    },
                    true,
                )
                .await
                .map_err(|e| self.map_write_error(e))?;

            let mut voters = self.voter_ids();
            if voters.contains(&node_id) {
                return Ok(());
            }
            voters.insert(node_id);
            self.raft
                .change_membership(voters, false)
                .await
                .map_err(|e| self.map_write_error(e))?;
            Ok(())
        };

        match tokio::time::timeout(timeout, fut).await {
            Err(_) => Err(Error::ConsensusTimeout),
            Ok(res) => res,
        }
    }

    /// Remove a node from the cluster. Leader-only; the target must not be
    /// the current leader.
    pub async fn remove_server(&self, node_id: NodeId, timeout: Duration) -> Result<()> {
        let fut = async {
            let mut voters = self.voter_ids();
            voters.remove(&node_id);
            self.raft
                .change_membership(voters, false)
                .await
                .map_err(|e| self.map_write_error(e))?;
            Ok(())
        };

        match tokio::time::timeout(timeout, fut).await {
            Err(_) => Err(Error::ConsensusTimeout),
            Ok(res) => res,
        }
    }

    pub fn state(&self) -> RaftRole {
        match self.raft.metrics().borrow().state {
            ServerState::Leader => RaftRole::Leader,
            ServerState::Follower => RaftRole::Follower,
            ServerState::Candidate => RaftRole::Candidate,
            ServerState::Learner => RaftRole::Learner,
            _ => RaftRole::Shutdown,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.state() == RaftRole::Leader
    }

    pub fn current_leader(&self) -> Option<NodeId> {
        self.raft.metrics().borrow().current_leader.clone()
    }

    /// Consensus endpoint of the current leader, if one is known.
    pub fn leader_consensus_addr(&self) -> Option<String> {
        let metrics = self.raft.metrics().borrow().clone();
        let leader = metrics.current_leader.as_ref()?;
        metrics
            .membership_config
            .membership()
            .get_node(leader)
            .map(|n| n.addr.clone())
    }

    /// Coordination endpoint of the current leader, derived by the address
    /// convention. This is what clients can dial.
    pub fn leader_coordination_addr(&self) -> Option<String> {
        let consensus = self.leader_consensus_addr()?;
        address::coordination_from_consensus(&consensus).ok()
    }

    /// The currently committed cluster configuration.
    pub fn configuration(&self) -> Vec<MemberInfo> {
        let metrics = self.raft.metrics().borrow().clone();
        let membership = metrics.membership_config.membership();
        let voters: BTreeSet<NodeId> = membership.voter_ids().collect();

        membership
            .nodes()
            .map(|(id, node)| MemberInfo {
                node_id: id.clone(),
                consensus_addr: node.addr.clone(),
                is_voter: voters.contains(id),
            })
            .collect()
    }

    /// Block until some node is leader, or the deadline passes.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<NodeId> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.raft.metrics();
        loop {
            if let Some(leader) = rx.borrow().current_leader.clone() {
                return Ok(leader);
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Err(_) => return Err(Error::NoLeader),
                Ok(Err(_)) => return Err(Error::Raft("metrics channel closed".into())),
                Ok(Ok(())) => {}
            }
        }
    }

    /// Block until this node has applied the log up to `index`.
    pub async fn wait_for_applied(&self, index: u64, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.raft.metrics();
        loop {
            let applied = rx.borrow().last_applied.as_ref().map(|l| l.index);
            if applied.unwrap_or(0) >= index {
                return Ok(());
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Err(_) => return Err(Error::ConsensusTimeout),
                Ok(Err(_)) => return Err(Error::Raft("metrics channel closed".into())),
                Ok(Ok(())) => {}
            }
        }
    }

    /// Ask the consensus core to take a snapshot now, outside the scheduled
    /// policy.
    pub async fn trigger_snapshot(&self) -> Result<()> {
        self.raft
            .trigger()
            .snapshot()
            .await
            .map_err(|e| Error::Raft(e.to_string()))
    }

    /// Graceful stop. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.raft.shutdown().await {
            tracing::warn!(error = %e, "raft core already stopped");
        }
        Ok(())
    }

    fn map_write_error(
        &self,
        e: RaftError<NodeId, ClientWriteError<NodeId, BasicNode>>,
    ) -> Error {
        match e {
            RaftError::APIError(ClientWriteError::ForwardToLeader(fwd)) => {
                let leader_addr = fwd
                    .leader_node
                    .map(|n| n.addr)
                    .and_then(|a| address::coordination_from_consensus(&a).ok())
                    .unwrap_or_default();
                if leader_addr.is_empty() {
                    Error::NoLeader
                } else {
                    Error::NotLeader { leader_addr }
                }
            }
            RaftError::APIError(ClientWriteError::ChangeMembershipError(e)) => {
                Error::Raft(e.to_string())
            }
            RaftError::Fatal(e) => Error::Raft(e.to_string()),
        }
    }

    fn voter_ids(&self) -> BTreeSet<NodeId> {
        self.raft
            .metrics()
            .borrow()
            .membership_config
            .membership()
            .voter_ids()
            .collect()
    }
}
