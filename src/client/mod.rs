//! Cluster client with automatic leader redirection.
//!
//! The application dials any node; the client follows leader redirects
//! transparently up to a bounded hop count, so leadership changes never
//! surface unless the budget runs out. Connections are pooled per
//! coordination address and shared by all calls.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};

use crate::common::{Error, Result, LEADER_ADDR_KEY, REDIRECT_FLAG_KEY};
use crate::proto;
use crate::proto::coordination_client::CoordinationClient;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordination endpoints of any cluster nodes (seed set)
    pub seeds: Vec<String>,

    /// Maximum leader redirects to follow per call
    pub max_redirects: usize,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Per-call deadline
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            seeds: vec![],
            max_redirects: 3,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ClusterClient {
    config: ClientConfig,
    pool: Arc<RwLock<HashMap<String, Channel>>>,
}

impl ClusterClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.seeds.is_empty() {
            return Err(Error::InvalidConfig("client needs at least one seed".into()));
        }
        if config.max_redirects == 0 {
            return Err(Error::InvalidConfig("max_redirects must be positive".into()));
        }
        Ok(Self {
            config,
            pool: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Client with default settings and a single seed.
    pub fn with_seed(addr: impl Into<String>) -> Result<Self> {
        Self::new(ClientConfig {
            seeds: vec![addr.into()],
            ..Default::default()
        })
    }

    /// Get or create the pooled channel for an address. The fast path takes
    /// only the read lock; the channel is built outside any lock.
    async fn channel(&self, addr: &str) -> Result<Channel> {
        if let Some(channel) = self.pool.read().await.get(addr) {
            return Ok(channel.clone());
        }

        let endpoint = Endpoint::from_shared(format!("http://{}", addr))
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr, e)))?
            .connect_timeout(self.config.connect_timeout);
        let channel = endpoint.connect_lazy();

        let mut pool = self.pool.write().await;
        // A racing caller may have inserted first; reuse its channel.
        Ok(pool.entry(addr.to_string()).or_insert(channel).clone())
    }

    /// Invoke `call` against the current target, following leader redirects.
    async fn with_redirect<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn(CoordinationClient<Channel>) -> Fut,
        Fut: Future<Output = std::result::Result<T, Status>>,
    {
        let mut target = self.config.seeds[0].clone();

        for hop in 0..=self.config.max_redirects {
            let channel = self.channel(&target).await?;
            let client = CoordinationClient::new(channel);

            match call(client).await {
                Ok(value) => return Ok(value),
                Err(status) => {
                    if let Some(leader) = redirect_target(&status) {
                        tracing::debug!(leader = %leader, hop, "following leader redirect");
                        target = leader;
                        continue;
                    }
                    return Err(Error::Grpc(status));
                }
            }
        }
        Err(Error::MaxRedirectsExceeded(self.config.max_redirects))
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut req = Request::new(message);
        req.set_timeout(self.config.request_timeout);
        req
    }

    // === Write operations (redirected to the leader as needed) ===

    pub async fn create_collection(
        &self,
        collection_name: &str,
        distance: &str,
        vector_dimension: i32,
        payload_table_schema: &str,
    ) -> Result<proto::CreateCollectionResponse> {
        self.with_redirect(|mut c| {
            let req = self.request(proto::CreateCollectionRequest {
                collection_name: collection_name.to_string(),
                distance: distance.to_string(),
                vector_dimension,
                payload_table_schema: payload_table_schema.to_string(),
            });
            async move { c.create_collection(req).await.map(|r| r.into_inner()) }
        })
        .await
    }

    pub async fn insert(
        &self,
        collection_name: &str,
        id: i64,
        vector: &[f32],
        payload_insert_query: &str,
    ) -> Result<proto::InsertResponse> {
        self.with_redirect(|mut c| {
            let req = self.request(proto::InsertRequest {
                collection_name: collection_name.to_string(),
                id,
                vector: vector.to_vec(),
                payload_insert_query: payload_insert_query.to_string(),
            });
            async move { c.insert(req).await.map(|r| r.into_inner()) }
        })
        .await
    }

    pub async fn delete(&self, collection_name: &str, id: i64) -> Result<proto::DeleteResponse> {
        self.with_redirect(|mut c| {
            let req = self.request(proto::DeleteRequest {
                collection_name: collection_name.to_string(),
                id,
            });
            async move { c.delete(req).await.map(|r| r.into_inner()) }
        })
        .await
    }

    pub async fn drop_collection(
        &self,
        collection_name: &str,
    ) -> Result<proto::DropCollectionResponse> {
        self.with_redirect(|mut c| {
            let req = self.request(proto::DropCollectionRequest {
                collection_name: collection_name.to_string(),
            });
            async move { c.drop_collection(req).await.map(|r| r.into_inner()) }
        })
        .await
    }

    // === Read operations (served by whichever node we dialed) ===

    pub async fn search(
        &self,
        collection_name: &str,
        vector: &[f32],
        top_k: u32,
        payload_search_query: &str,
    ) -> Result<proto::SearchResponse> {
        self.with_redirect(|mut c| {
            let req = self.request(proto::SearchRequest {
                collection_name: collection_name.to_string(),
                vector: vector.to_vec(),
                top_k,
                payload_search_query: payload_search_query.to_string(),
            });
            async move { c.search(req).await.map(|r| r.into_inner()) }
        })
        .await
    }

    pub async fn collection_exists(&self, collection_name: &str) -> Result<bool> {
        self.with_redirect(|mut c| {
            let req = self.request(proto::CollectionExistsRequest {
                collection_name: collection_name.to_string(),
            });
            async move { c.collection_exists(req).await.map(|r| r.into_inner().exists) }
        })
        .await
    }

    // === Cluster management ===

    pub async fn get_cluster_info(&self) -> Result<proto::ClusterInfoResponse> {
        self.with_redirect(|mut c| {
            let req = self.request(proto::GetClusterInfoRequest {});
            async move { c.get_cluster_info(req).await.map(|r| r.into_inner()) }
        })
        .await
    }

    pub async fn join_cluster(
        &self,
        node_id: &str,
        node_addr: &str,
    ) -> Result<proto::JoinClusterResponse> {
        self.with_redirect(|mut c| {
            let req = self.request(proto::JoinClusterRequest {
                node_id: node_id.to_string(),
                node_addr: node_addr.to_string(),
            });
            async move { c.join_cluster(req).await.map(|r| r.into_inner()) }
        })
        .await
    }

    pub async fn leave_cluster(&self, node_id: &str) -> Result<proto::LeaveClusterResponse> {
        self.with_redirect(|mut c| {
            let req = self.request(proto::LeaveClusterRequest {
                node_id: node_id.to_string(),
            });
            async move { c.leave_cluster(req).await.map(|r| r.into_inner()) }
        })
        .await
    }

    // === Discovery helpers ===

    /// Leader's coordination endpoint, as reported by a seed. A latency
    /// optimization only; the redirect path does not need it.
    pub async fn find_leader(&self) -> Result<String> {
        let info = self.get_cluster_info().await?;
        if info.leader_addr.is_empty() {
            return Err(Error::NoLeader);
        }
        Ok(info.leader_addr)
    }

    pub async fn is_leader(&self) -> Result<bool> {
        let info = self.get_cluster_info().await?;
        Ok(info.state == "Leader")
    }
}

/// Extract the redirect target from a failed call, if the status carries
/// the redirect contract.
fn redirect_target(status: &Status) -> Option<String> {
    if status.code() != Code::FailedPrecondition {
        return None;
    }
    let md = status.metadata();
    let flagged = md
        .get(REDIRECT_FLAG_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true")
        .unwrap_or(false);
    let leader = md.get(LEADER_ADDR_KEY).and_then(|v| v.to_str().ok());
    match (flagged, leader) {
        (true, Some(addr)) if !addr.is_empty() => Some(addr.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_seed_set() {
        assert!(ClusterClient::new(ClientConfig::default()).is_err());
        assert!(ClusterClient::with_seed("127.0.0.1:5002").is_ok());
    }

    #[test]
    fn test_redirect_target_extraction() {
        let mut status = Status::new(Code::FailedPrecondition, "not leader");
        status
            .metadata_mut()
            .insert(REDIRECT_FLAG_KEY, "true".parse().unwrap());
        status
            .metadata_mut()
            .insert(LEADER_ADDR_KEY, "127.0.0.1:5002".parse().unwrap());
        assert_eq!(redirect_target(&status), Some("127.0.0.1:5002".to_string()));

        // Wrong code, or missing metadata, is not a redirect.
        let status = Status::new(Code::Unavailable, "no leader");
        assert_eq!(redirect_target(&status), None);
        let status = Status::new(Code::FailedPrecondition, "precondition");
        assert_eq!(redirect_target(&status), None);
    }
}
