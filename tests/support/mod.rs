//! Shared test fixtures: an in-memory vector store served over gRPC, and
//! helpers for wiring nodes onto free ports that honor the port convention.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{Request, Response, Status, Streaming};

use vecraft::proto;
use vecraft::proto::vector_store_server::{VectorStore, VectorStoreServer};
use vecraft::NodeConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct MockPoint {
    vector: Vec<f32>,
    payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct MockCollection {
    distance: String,
    dimension: i32,
    schema: String,
    points: BTreeMap<i64, MockPoint>,
}

/// In-memory stand-in for the single-node vector store, with the same
/// deterministic status codes the real backend reports: `AlreadyExists` for
/// duplicate collections/ids, `NotFound` for absent targets,
/// `FailedPrecondition` for schema conflicts and `InvalidArgument` for
/// dimension mismatches.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BTreeMap<String, MockCollection>>>,
}

impl MockBackend {
    pub fn collection_names(&self) -> Vec<String> {
        self.state.lock().unwrap().keys().cloned().collect()
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }

    fn snapshot_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&*self.state.lock().unwrap()).unwrap()
    }

    fn restore_bytes(&self, bytes: &[u8]) -> Result<(), String> {
        let state: BTreeMap<String, MockCollection> =
            serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        *self.state.lock().unwrap() = state;
        Ok(())
    }
}

fn score(distance: &str, query: &[f32], point: &[f32]) -> f32 {
    let dot: f32 = query.iter().zip(point).map(|(a, b)| a * b).sum();
    match distance {
        "Euclidean" => query
            .iter()
            .zip(point)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt(),
        "InnerProduct" => -dot,
        // Cosine distance
        _ => {
            let qn: f32 = query.iter().map(|v| v * v).sum::<f32>().sqrt();
            let pn: f32 = point.iter().map(|v| v * v).sum::<f32>().sqrt();
            if qn == 0.0 || pn == 0.0 {
                1.0
            } else {
                1.0 - dot / (qn * pn)
            }
        }
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[tonic::async_trait]
impl VectorStore for MockBackend {
    async fn create_collection(
        &self,
        req: Request<proto::CollectionConfig>,
    ) -> Result<Response<proto::StoreAck>, Status> {
        let req = req.into_inner();
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.get(&req.collection_name) {
            if existing.distance == req.distance
                && existing.dimension == req.vector_dimension
                && existing.schema == req.payload_table_schema
            {
                return Err(Status::already_exists(format!(
                    "collection {} already exists",
                    req.collection_name
                )));
            }
            return Err(Status::failed_precondition(format!(
                "collection {} exists with a different schema",
                req.collection_name
            )));
        }

        state.insert(
            req.collection_name,
            MockCollection {
                distance: req.distance,
                dimension: req.vector_dimension,
                schema: req.payload_table_schema,
                points: BTreeMap::new(),
            },
        );
        Ok(Response::new(proto::StoreAck {}))
    }

    async fn insert(
        &self,
        req: Request<proto::InsertPoint>,
    ) -> Result<Response<proto::StoreAck>, Status> {
        let req = req.into_inner();
        let mut state = self.state.lock().unwrap();

        let collection = state
            .get_mut(&req.collection_name)
            .ok_or_else(|| Status::not_found(format!("collection {}", req.collection_name)))?;
        if req.vector.len() as i32 != collection.dimension {
            return Err(Status::invalid_argument(format!(
                "dimension mismatch: expected {}, got {}",
                collection.dimension,
                req.vector.len()
            )));
        }
        if collection.points.contains_key(&req.id) {
            return Err(Status::already_exists(format!("id {}", req.id)));
        }

        collection.points.insert(
            req.id,
            MockPoint {
                vector: req.vector,
                payload: req.payload_insert_query,
            },
        );
        Ok(Response::new(proto::StoreAck {}))
    }

    async fn delete(
        &self,
        req: Request<proto::DeletePoint>,
    ) -> Result<Response<proto::StoreAck>, Status> {
        let req = req.into_inner();
        let mut state = self.state.lock().unwrap();

        let collection = state
            .get_mut(&req.collection_name)
            .ok_or_else(|| Status::not_found(format!("collection {}", req.collection_name)))?;
        collection
            .points
            .remove(&req.id)
            .ok_or_else(|| Status::not_found(format!("id {}", req.id)))?;
        Ok(Response::new(proto::StoreAck {}))
    }

    async fn drop_collection(
        &self,
        req: Request<proto::DropTarget>,
    ) -> Result<Response<proto::StoreAck>, Status> {
        let req = req.into_inner();
        let mut state = self.state.lock().unwrap();
        state
            .remove(&req.collection_name)
            .ok_or_else(|| Status::not_found(format!("collection {}", req.collection_name)))?;
        Ok(Response::new(proto::StoreAck {}))
    }

    async fn search(
        &self,
        req: Request<proto::SearchPoint>,
    ) -> Result<Response<proto::SearchResponse>, Status> {
        let req = req.into_inner();
        let state = self.state.lock().unwrap();

        let collection = state
            .get(&req.collection_name)
            .ok_or_else(|| Status::not_found(format!("collection {}", req.collection_name)))?;

        let mut scored: Vec<(i64, f32, &MockPoint)> = collection
            .points
            .iter()
            .map(|(id, p)| (*id, score(&collection.distance, &req.vector, &p.vector), p))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(req.top_k as usize);

        let results = scored
            .into_iter()
            .map(|(id, distance, p)| proto::SearchResultItem {
                rowid: id,
                distance,
                payload: vec![proto::KeyValue {
                    key: "payload".to_string(),
                    value: p.payload.clone(),
                }],
            })
            .collect();
        Ok(Response::new(proto::SearchResponse { results }))
    }

    async fn collection_exists(
        &self,
        req: Request<proto::ExistsProbe>,
    ) -> Result<Response<proto::CollectionExistsResponse>, Status> {
        let req = req.into_inner();
        let exists = self.state.lock().unwrap().contains_key(&req.collection_name);
        Ok(Response::new(proto::CollectionExistsResponse { exists }))
    }

    type ExportSnapshotStream = ReceiverStream<Result<proto::SnapshotChunkPb, Status>>;

    async fn export_snapshot(
        &self,
        req: Request<proto::ExportSnapshotRequest>,
    ) -> Result<Response<Self::ExportSnapshotStream>, Status> {
        let req = req.into_inner();
        let chunk_size = req.chunk_size.max(1) as usize;
        let file = self.snapshot_bytes();
        let checksum = hex_string(&Sha256::digest(&file));

        let metadata = proto::SnapshotMetadataPb {
            snapshot_id: format!("mock-{}", file.len()),
            created_at: 1_700_000_000_000,
            total_size: file.len() as u64,
            files: vec![proto::SnapshotFileInfoPb {
                file_name: "database.db".to_string(),
                file_type: proto::SnapshotFileType::SqliteDb as i32,
                file_size: file.len() as u64,
                checksum,
            }],
            version: 1,
            checksum: String::new(),
        };

        let mut chunks = vec![proto::SnapshotChunkPb {
            metadata: Some(metadata),
            file_chunk: None,
            sequence: 0,
            is_final: false,
        }];
        let pieces: Vec<&[u8]> = file.chunks(chunk_size).collect();
        let total = pieces.len();
        for (i, piece) in pieces.into_iter().enumerate() {
            chunks.push(proto::SnapshotChunkPb {
                metadata: None,
                file_chunk: Some(proto::FileChunkPb {
                    file_name: "database.db".to_string(),
                    offset: (i * chunk_size) as u64,
                    data: piece.to_vec(),
                    is_last_chunk: i + 1 == total,
                }),
                sequence: (i + 1) as u64,
                is_final: i + 1 == total,
            });
        }
        if total == 0 {
            chunks[0].is_final = true;
        }

        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn import_snapshot(
        &self,
        req: Request<Streaming<proto::SnapshotChunkPb>>,
    ) -> Result<Response<proto::ImportSnapshotResponse>, Status> {
        let mut stream = req.into_inner();

        let mut snapshot_id = String::new();
        let mut file = Vec::new();
        while let Some(chunk) = stream.message().await? {
            if let Some(meta) = &chunk.metadata {
                snapshot_id = meta.snapshot_id.clone();
            }
            if let Some(fc) = &chunk.file_chunk {
                file.extend_from_slice(&fc.data);
            }
            if chunk.is_final {
                break;
            }
        }

        let bytes_restored = file.len() as u64;
        match self.restore_bytes(&file) {
            Ok(()) => Ok(Response::new(proto::ImportSnapshotResponse {
                success: true,
                error_message: String::new(),
                snapshot_id,
                bytes_restored,
                files_restored: 1,
            })),
            Err(e) => Ok(Response::new(proto::ImportSnapshotResponse {
                success: false,
                error_message: e,
                snapshot_id,
                bytes_restored: 0,
                files_restored: 0,
            })),
        }
    }
}

/// Serve a mock backend on an ephemeral port. Returns its dial address.
pub async fn spawn_backend() -> (String, MockBackend) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let backend = MockBackend::default();

    let service = VectorStoreServer::new(backend.clone());
    tokio::spawn(async move {
        let _ = tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await;
    });

    (format!("http://{}", addr), backend)
}

/// Pick a base port whose derived consensus and coordination ports are both
/// free right now.
pub fn pick_base_port() -> u16 {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    for _ in 0..64 {
        let base: u16 = rng.gen_range(3000..6400);
        let consensus = base as u32 * 10 + 1;
        let coordination = base as u32 * 10 + 2;
        let free = |port: u32| std::net::TcpListener::bind(("127.0.0.1", port as u16)).is_ok();
        if free(consensus) && free(coordination) {
            return base;
        }
    }
    panic!("no free base port found");
}

pub fn node_config(
    node_id: &str,
    base_port: u16,
    backend_addr: &str,
    data_dir: &Path,
    bootstrap: bool,
    seeds: Vec<String>,
) -> NodeConfig {
    NodeConfig {
        node_id: node_id.to_string(),
        host: "127.0.0.1".to_string(),
        base_port,
        backend_addr: backend_addr.to_string(),
        data_dir: data_dir.to_path_buf(),
        bootstrap,
        seeds,
        apply_timeout_ms: 5_000,
        heartbeat_interval_ms: 100,
        snapshot_threshold: 5_000,
        snapshot_chunk_size: 1024,
    }
}
