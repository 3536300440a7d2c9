//! # vecraft
//!
//! A replicated coordination proxy for single-node vector stores:
//! - Raft consensus sequences every mutation; each node applies the log
//!   to its colocated vector store, so every replica holds the same data
//! - Reads (search, existence checks) are served locally by any node
//! - Followers redirect writes to the leader via response metadata; the
//!   client runtime follows redirects transparently
//! - Followers that fall behind are caught up by streaming the backend's
//!   physical snapshot files through the Raft snapshot channel
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 vecraft cluster                 │
//! │  node-1 (leader)     node-2        node-3       │
//! │  ┌───────────┐     ┌──────────┐  ┌──────────┐   │
//! │  │ coord rpc │     │ redirect │  │ redirect │   │
//! │  │ raft log ─┼────►│ apply    ├─►│ apply    │   │
//! │  └─────┬─────┘     └────┬─────┘  └────┬─────┘   │
//! └────────┼────────────────┼─────────────┼─────────┘
//!          │ gRPC           │ gRPC        │ gRPC
//!    ┌─────▼─────┐    ┌─────▼─────┐ ┌─────▼─────┐
//!    │ vector    │    │ vector    │ │ vector    │
//!    │ store 1   │    │ store 2   │ │ store 3   │
//!    └───────────┘    └───────────┘ └───────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the first node
//! ```bash
//! vecraft-node serve --id node1 --base-port 500 \
//!   --backend-addr http://127.0.0.1:50051 \
//!   --data-dir ./data --bootstrap
//! ```
//!
//! ### Add a node
//! ```bash
//! vecraft-node serve --id node2 --base-port 501 \
//!   --backend-addr http://127.0.0.1:50052 \
//!   --data-dir ./data --join 127.0.0.1:5002
//! ```
//!
//! ### Use the CLI
//! ```bash
//! vecraft --addr 127.0.0.1:5002 create-collection users \
//!   --distance cosine --dimension 4 \
//!   --schema "create table users(rowid integer primary key, name text)"
//!
//! vecraft --addr 127.0.0.1:5012 search users --vector 1,2,3,4 --top-k 3
//! ```

pub mod backend;
pub mod client;
pub mod cluster;
pub mod common;
pub mod consensus;

// Re-export commonly used types
pub use client::ClusterClient;
pub use cluster::ClusterNode;
pub use common::{Error, NodeConfig, Result};

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("vecraft");
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
