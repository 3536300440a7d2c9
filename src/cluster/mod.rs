//! Cluster-facing surface of a node: the coordination RPC service, the
//! leader-redirect filter in front of it, and node orchestration.

pub mod filter;
pub mod server;
pub mod service;

pub use filter::{LeaderRedirectLayer, OpClass};
pub use server::{ClusterNode, NodeHandle};
pub use service::CoordinationService;
