//! Leader-redirect filter for the coordination server.
//!
//! A tower layer wrapped around the gRPC service. Every request is classified
//! by its method path; write and membership calls on a non-leader are
//! answered before any handler runs: `FailedPrecondition` with the leader's
//! coordination endpoint in `x-leader-addr` metadata when a leader is known,
//! `Unavailable` otherwise. Reads and introspection always pass through.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tonic::body::BoxBody;
use tower::{Layer, Service};

use crate::common::{LEADER_ADDR_KEY, REDIRECT_FLAG_KEY};
use crate::consensus::ConsensusNode;

/// Classification of a coordination RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Write,
    Membership,
    Read,
    Introspective,
    Unknown,
}

impl OpClass {
    pub fn classify(path: &str) -> OpClass {
        match path {
            "/vecraft.Coordination/CreateCollection"
            | "/vecraft.Coordination/Insert"
            | "/vecraft.Coordination/Delete"
            | "/vecraft.Coordination/DropCollection" => OpClass::Write,
            "/vecraft.Coordination/JoinCluster" | "/vecraft.Coordination/LeaveCluster" => {
                OpClass::Membership
            }
            "/vecraft.Coordination/Search" | "/vecraft.Coordination/CollectionExists" => {
                OpClass::Read
            }
            "/vecraft.Coordination/GetClusterInfo" => OpClass::Introspective,
            _ => OpClass::Unknown,
        }
    }

    pub fn requires_leader(&self) -> bool {
        matches!(self, OpClass::Write | OpClass::Membership)
    }
}

#[derive(Clone)]
pub struct LeaderRedirectLayer {
    consensus: Arc<ConsensusNode>,
}

impl LeaderRedirectLayer {
    pub fn new(consensus: Arc<ConsensusNode>) -> Self {
        Self { consensus }
    }
}

impl<S> Layer<S> for LeaderRedirectLayer {
    type Service = LeaderRedirect<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LeaderRedirect {
            inner,
            consensus: self.consensus.clone(),
        }
    }
}

#[derive(Clone)]
pub struct LeaderRedirect<S> {
    inner: S,
    consensus: Arc<ConsensusNode>,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for LeaderRedirect<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let class = OpClass::classify(req.uri().path());
        if class.requires_leader() && !self.consensus.is_leader() {
            let response = match self.consensus.leader_coordination_addr() {
                Some(leader_addr) => redirect_response(&leader_addr),
                None => unavailable_response(),
            };
            return Box::pin(async move { Ok(response) });
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}

/// Trailers-only gRPC response: FAILED_PRECONDITION plus redirect metadata.
fn redirect_response(leader_addr: &str) -> http::Response<BoxBody> {
    grpc_error_response(
        tonic::Code::FailedPrecondition,
        &format!("not leader, redirect to: {}", leader_addr),
        Some(leader_addr),
    )
}

/// Trailers-only gRPC response: UNAVAILABLE, no redirect metadata.
fn unavailable_response() -> http::Response<BoxBody> {
    grpc_error_response(
        tonic::Code::Unavailable,
        "no leader available, please retry",
        None,
    )
}

fn grpc_error_response(
    code: tonic::Code,
    message: &str,
    leader_addr: Option<&str>,
) -> http::Response<BoxBody> {
    let mut builder = http::Response::builder()
        .status(http::StatusCode::OK)
        .header("content-type", "application/grpc")
        .header("grpc-status", (code as i32).to_string())
        .header("grpc-message", message);
    if let Some(addr) = leader_addr {
        builder = builder
            .header(REDIRECT_FLAG_KEY, "true")
            .header(LEADER_ADDR_KEY, addr);
    }
    builder.body(tonic::body::empty_body()).unwrap()
}
