//! Typed client for the colocated vector store.
//!
//! The backend is an opaque single-node store; this wrapper gives the FSM and
//! the read path a typed surface and maps the backend's deterministic status
//! codes onto [`BackendError`] so callers can tell apart "already exists",
//! "not found" and "schema conflict" outcomes.

use crate::backend::types::CollectionSpec;
use crate::consensus::codec::SnapshotChunk;
use crate::proto;
use crate::proto::vector_store_client::VectorStoreClient;
use std::time::Duration;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;

/// Errors reported by the vector store, classified by status code.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Other(String),
}

impl From<tonic::Status> for BackendError {
    fn from(status: tonic::Status) -> Self {
        let msg = status.message().to_string();
        match status.code() {
            Code::AlreadyExists => BackendError::AlreadyExists(msg),
            Code::NotFound => BackendError::NotFound(msg),
            Code::FailedPrecondition => BackendError::SchemaConflict(msg),
            Code::InvalidArgument => BackendError::Rejected(msg),
            Code::Unavailable | Code::DeadlineExceeded => BackendError::Unavailable(msg),
            _ => BackendError::Other(msg),
        }
    }
}

impl BackendError {
    /// Whether the mutation could not have taken effect on the backend.
    ///
    /// Unavailable means the call may not even have reached the store; an
    /// apply that sees this must not consume the log entry.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }

    pub fn to_grpc_status(&self) -> tonic::Status {
        match self {
            BackendError::AlreadyExists(m) => tonic::Status::already_exists(m.clone()),
            BackendError::NotFound(m) => tonic::Status::not_found(m.clone()),
            BackendError::SchemaConflict(m) => tonic::Status::failed_precondition(m.clone()),
            BackendError::Rejected(m) => tonic::Status::invalid_argument(m.clone()),
            BackendError::Unavailable(m) => tonic::Status::unavailable(m.clone()),
            BackendError::Other(m) => tonic::Status::internal(m.clone()),
        }
    }
}

/// Shared client for the local vector store.
///
/// Cheap to clone; all clones share one HTTP/2 channel. The channel is lazy:
/// it connects on first use, so the node can come up before its backend.
#[derive(Clone)]
pub struct BackendClient {
    inner: VectorStoreClient<Channel>,
    addr: String,
}

impl BackendClient {
    pub fn connect_lazy(addr: &str) -> crate::Result<Self> {
        let endpoint = Endpoint::from_shared(addr.to_string())
            .map_err(|e| crate::Error::InvalidAddress(format!("{}: {}", addr, e)))?
            .connect_timeout(Duration::from_secs(5));
        let channel = endpoint.connect_lazy();
        Ok(Self {
            inner: VectorStoreClient::new(channel),
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), BackendError> {
        let mut client = self.inner.clone();
        let req = proto::CollectionConfig {
            collection_name: spec.name.clone(),
            distance: spec.distance.to_string(),
            vector_dimension: spec.dimension,
            payload_table_schema: spec.payload_table_schema.clone(),
        };
        client.create_collection(req).await?;
        Ok(())
    }

    pub async fn insert(
        &self,
        collection_name: &str,
        id: i64,
        vector: &[f32],
        payload_insert_query: &str,
    ) -> Result<(), BackendError> {
        let mut client = self.inner.clone();
        let req = proto::InsertPoint {
            collection_name: collection_name.to_string(),
            id,
            vector: vector.to_vec(),
            payload_insert_query: payload_insert_query.to_string(),
        };
        client.insert(req).await?;
        Ok(())
    }

    pub async fn delete(&self, collection_name: &str, id: i64) -> Result<(), BackendError> {
        let mut client = self.inner.clone();
        let req = proto::DeletePoint {
            collection_name: collection_name.to_string(),
            id,
        };
        client.delete(req).await?;
        Ok(())
    }

    pub async fn drop_collection(&self, collection_name: &str) -> Result<(), BackendError> {
        let mut client = self.inner.clone();
        let req = proto::DropTarget {
            collection_name: collection_name.to_string(),
        };
        client.drop_collection(req).await?;
        Ok(())
    }

    pub async fn search(
        &self,
        collection_name: &str,
        vector: &[f32],
        top_k: u32,
        payload_search_query: &str,
    ) -> Result<proto::SearchResponse, BackendError> {
        let mut client = self.inner.clone();
        let req = proto::SearchPoint {
            collection_name: collection_name.to_string(),
            vector: vector.to_vec(),
            top_k,
            payload_search_query: payload_search_query.to_string(),
        };
        Ok(client.search(req).await?.into_inner())
    }

    pub async fn collection_exists(&self, collection_name: &str) -> Result<bool, BackendError> {
        let mut client = self.inner.clone();
        let req = proto::ExistsProbe {
            collection_name: collection_name.to_string(),
        };
        Ok(client.collection_exists(req).await?.into_inner().exists)
    }

    /// Stream a full snapshot out of the backend and collect the ordered
    /// chunk sequence.
    pub async fn export_snapshot(
        &self,
        chunk_size: u32,
        include_index_files: bool,
    ) -> Result<Vec<SnapshotChunk>, BackendError> {
        let mut client = self.inner.clone();
        let req = proto::ExportSnapshotRequest {
            chunk_size,
            include_index_files,
        };
        let mut stream = client.export_snapshot(req).await?.into_inner();

        let mut chunks = Vec::new();
        while let Some(pb) = stream.message().await? {
            let is_final = pb.is_final;
            let chunk = SnapshotChunk::try_from(pb).map_err(BackendError::Other)?;
            chunks.push(chunk);
            if is_final {
                break;
            }
        }
        Ok(chunks)
    }

    /// Replace the backend's state with the given chunk sequence.
    pub async fn import_snapshot(
        &self,
        chunks: &[SnapshotChunk],
    ) -> Result<proto::ImportSnapshotResponse, BackendError> {
        let mut client = self.inner.clone();
        let pb: Vec<proto::SnapshotChunkPb> = chunks.iter().map(Into::into).collect();
        let resp = client
            .import_snapshot(tokio_stream::iter(pb))
            .await?
            .into_inner();
        if !resp.success {
            return Err(BackendError::Other(resp.error_message));
        }
        Ok(resp)
    }
}
