//! Replicated command envelope.
//!
//! A [`Command`] is the unit of replicated mutation: it is proposed on the
//! leader, sequenced through the Raft log, and applied by every node's state
//! machine in log order. Commands serialize as self-describing JSON so a log
//! entry can always be decoded without out-of-band schema knowledge.

use crate::backend::{CollectionSpec, DistanceFunction};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCollectionPayload {
    pub collection_name: String,
    pub vector_dimension: i32,
    pub distance: DistanceFunction,
    pub payload_table_schema: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertPayload {
    pub collection_name: String,
    pub id: i64,
    pub vector: Vec<f32>,
    pub payload_insert_query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletePayload {
    pub collection_name: String,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropCollectionPayload {
    pub collection_name: String,
}

/// A replicated intent. Every variant must be idempotent under repeated
/// application: apply timeouts leave the commit ambiguous, and callers retry
/// by resubmitting the same command with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Command {
    CreateCollection(CreateCollectionPayload),
    Insert(InsertPayload),
    Delete(DeletePayload),
    DropCollection(DropCollectionPayload),
}

impl Command {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::Internal(format!("failed to encode command: {}", e)))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Internal(format!("failed to decode command: {}", e)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::CreateCollection(_) => "create_collection",
            Command::Insert(_) => "insert",
            Command::Delete(_) => "delete",
            Command::DropCollection(_) => "drop_collection",
        }
    }

    pub fn collection_name(&self) -> &str {
        match self {
            Command::CreateCollection(p) => &p.collection_name,
            Command::Insert(p) => &p.collection_name,
            Command::Delete(p) => &p.collection_name,
            Command::DropCollection(p) => &p.collection_name,
        }
    }
}

impl CreateCollectionPayload {
    pub fn spec(&self) -> CollectionSpec {
        CollectionSpec {
            name: self.collection_name.clone(),
            dimension: self.vector_dimension,
            distance: self.distance,
            payload_table_schema: self.payload_table_schema.clone(),
        }
    }
}

/// Outcome of applying a command, reported back to the proposing client.
///
/// A failed apply is a report, not a control decision: the log entry has been
/// committed and consumed either way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Failure with a stable, machine-inspectable kind prefix.
    pub fn fail(kind: &str, message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            message: format!("{}: {}", kind, message),
        }
    }
}
