//! Error types for vecraft

use crate::backend::BackendError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Metadata key carrying the leader's coordination endpoint on redirects.
pub const LEADER_ADDR_KEY: &str = "x-leader-addr";

/// Metadata key flagging a response as a leader redirect.
pub const REDIRECT_FLAG_KEY: &str = "x-redirect";

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Consensus Errors ===
    #[error("not leader, redirect to: {leader_addr}")]
    NotLeader { leader_addr: String },

    #[error("no leader available, please retry")]
    NoLeader,

    #[error("consensus timeout: outcome unknown, command may still commit")]
    ConsensusTimeout,

    #[error("raft error: {0}")]
    Raft(String),

    #[error("apply failed: {0}")]
    ApplyFailed(String),

    // === Validation Errors ===
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // === Snapshot Errors ===
    #[error("snapshot codec error: {0}")]
    SnapshotCodec(String),

    // === Backend Errors ===
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    // === Network Errors ===
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("max redirects ({0}) exceeded")]
    MaxRedirectsExceeded(usize),

    // === Storage Errors ===
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    // === Config Errors ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    // === Generic ===
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConsensusTimeout
                | Error::NoLeader
                | Error::NotLeader { .. }
                | Error::ConnectionFailed(_)
        )
    }

    /// Convert to a gRPC status for RPC responses.
    ///
    /// `NotLeader` carries the redirect metadata contract: the status code is
    /// `FailedPrecondition` and the leader's coordination endpoint rides in
    /// `x-leader-addr` with `x-redirect: true`.
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::NotLeader { leader_addr } if !leader_addr.is_empty() => {
                let mut status = tonic::Status::new(Code::FailedPrecondition, self.to_string());
                let md = status.metadata_mut();
                if let Ok(v) = leader_addr.parse() {
                    md.insert(LEADER_ADDR_KEY, v);
                    md.insert(REDIRECT_FLAG_KEY, "true".parse().unwrap());
                }
                status
            }
            Error::NotLeader { .. } | Error::NoLeader => {
                tonic::Status::new(Code::Unavailable, "no leader available, please retry")
            }
            Error::ConsensusTimeout => tonic::Status::new(Code::DeadlineExceeded, self.to_string()),
            Error::InvalidRequest(_) | Error::InvalidConfig(_) | Error::InvalidAddress(_) => {
                tonic::Status::new(Code::InvalidArgument, self.to_string())
            }
            Error::Backend(e) => e.to_grpc_status(),
            Error::Grpc(status) => status.clone(),
            Error::ConnectionFailed(_) => tonic::Status::new(Code::Unavailable, self.to_string()),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
