//! Consensus layer.
//!
//! Wraps the openraft library: type bindings, the replica store (log, stable
//! state, snapshots and the state-machine binding to the backend), the gRPC
//! peer transport, and the node facade the rest of the system talks to.

pub mod codec;
pub mod command;
pub mod network;
pub mod node;
pub mod store;

use openraft::BasicNode;
use std::io::Cursor;

pub type NodeId = String;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = command::Command,
        R = command::CommandResponse,
        NodeId = NodeId,
        Node = BasicNode,
        SnapshotData = Cursor<Vec<u8>>
);

pub type VecRaft = openraft::Raft<TypeConfig>;

pub use command::{Command, CommandResponse};
pub use node::{ConsensusNode, MemberInfo, RaftRole};
pub use store::ReplicaStore;
