//! Snapshot frame codec.
//!
//! The Raft snapshot channel moves an opaque byte stream; the backend speaks
//! in sequenced chunks. This module bridges the two with a length-prefixed
//! framing: each frame is a 4-byte unsigned big-endian length followed by the
//! JSON-serialized chunk. Chunk 0 carries the snapshot manifest, every data
//! chunk carries a slice of one file, and exactly one chunk (the last) has
//! `is_final` set.

use crate::common::{Error, Result};
use crate::proto;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};

/// Type of file carried by a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotFileType {
    Unknown,
    SqliteDb,
    HnswIndex,
    Wal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFileInfo {
    pub file_name: String,
    pub file_type: SnapshotFileType,
    pub file_size: u64,
    pub checksum: String,
}

/// Manifest of a complete snapshot; present on chunk 0 only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub snapshot_id: String,
    pub created_at: i64,
    pub total_size: u64,
    pub files: Vec<SnapshotFileInfo>,
    pub version: u32,
    pub checksum: String,
}

/// A slice of one physical file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChunk {
    pub file_name: String,
    pub offset: u64,
    pub data: Vec<u8>,
    pub is_last_chunk: bool,
}

/// One unit of the backend's streamed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotChunk {
    pub metadata: Option<SnapshotMetadata>,
    pub file_chunk: Option<FileChunk>,
    pub sequence: u64,
    pub is_final: bool,
}

// --- framing ---

/// Write a single chunk with its length prefix.
pub fn write_chunk<W: Write>(w: &mut W, chunk: &SnapshotChunk) -> Result<()> {
    let data = serde_json::to_vec(chunk)
        .map_err(|e| Error::SnapshotCodec(format!("failed to serialize chunk: {}", e)))?;
    let len = u32::try_from(data.len())
        .map_err(|_| Error::SnapshotCodec("chunk exceeds frame size limit".into()))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(&data)?;
    Ok(())
}

/// Read a single chunk. `Ok(None)` means clean end of stream; a partial
/// length prefix or a short payload is an error.
pub fn read_chunk<R: Read>(r: &mut R) -> Result<Option<SnapshotChunk>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = r.read(&mut len_buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::SnapshotCodec("truncated length prefix".into()));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    let mut data = vec![0u8; len];
    r.read_exact(&mut data)
        .map_err(|_| Error::SnapshotCodec(format!("truncated frame: expected {} bytes", len)))?;

    let chunk = serde_json::from_slice(&data)
        .map_err(|e| Error::SnapshotCodec(format!("failed to deserialize chunk: {}", e)))?;
    Ok(Some(chunk))
}

/// Frame every chunk in order into the writer.
pub fn write_stream<W: Write>(w: &mut W, chunks: &[SnapshotChunk]) -> Result<()> {
    for chunk in chunks {
        write_chunk(w, chunk)?;
    }
    Ok(())
}

/// Read chunks until clean EOF or the final chunk.
pub fn read_stream<R: Read>(r: &mut R) -> Result<Vec<SnapshotChunk>> {
    let mut chunks = Vec::new();
    while let Some(chunk) = read_chunk(r)? {
        let is_final = chunk.is_final;
        chunks.push(chunk);
        if is_final {
            break;
        }
    }
    Ok(chunks)
}

/// Frame a chunk sequence into an owned byte buffer.
pub fn encode_stream(chunks: &[SnapshotChunk]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_stream(&mut buf, chunks)?;
    Ok(buf)
}

// --- validation ---

/// Check the structural invariants of a decoded chunk sequence and verify
/// per-file checksums against the manifest.
///
/// Required shape: sequences contiguous from 0, metadata on chunk 0, exactly
/// one final chunk in last position. Files are reassembled in order and their
/// SHA-256 digests compared with the manifest; manifests without checksums
/// skip that comparison.
pub fn verify_chunks(chunks: &[SnapshotChunk]) -> Result<()> {
    if chunks.is_empty() {
        return Err(Error::SnapshotCodec("empty chunk sequence".into()));
    }

    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.sequence != i as u64 {
            return Err(Error::SnapshotCodec(format!(
                "sequence gap: expected {}, got {}",
                i, chunk.sequence
            )));
        }
        if chunk.is_final != (i == chunks.len() - 1) {
            return Err(Error::SnapshotCodec(format!(
                "misplaced final marker at sequence {}",
                chunk.sequence
            )));
        }
    }

    let metadata = chunks[0]
        .metadata
        .as_ref()
        .ok_or_else(|| Error::SnapshotCodec("first chunk is missing metadata".into()))?;

    let mut hashers: HashMap<&str, Sha256> = HashMap::new();
    for chunk in chunks {
        if let Some(fc) = &chunk.file_chunk {
            hashers
                .entry(fc.file_name.as_str())
                .or_default()
                .update(&fc.data);
        }
    }

    for file in &metadata.files {
        if file.checksum.is_empty() {
            continue;
        }
        let digest = hashers
            .remove(file.file_name.as_str())
            .ok_or_else(|| {
                Error::SnapshotCodec(format!("manifest file missing from stream: {}", file.file_name))
            })?
            .finalize();
        let actual = hex_string(&digest);
        if actual != file.checksum {
            return Err(Error::SnapshotCodec(format!(
                "checksum mismatch for {}: expected {}, got {}",
                file.file_name, file.checksum, actual
            )));
        }
    }

    Ok(())
}

/// SHA-256 hex digest, as recorded in snapshot manifests.
pub fn sha256_hex(data: &[u8]) -> String {
    hex_string(&Sha256::digest(data))
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// --- proto conversions ---

impl From<SnapshotFileType> for proto::SnapshotFileType {
    fn from(t: SnapshotFileType) -> Self {
        match t {
            SnapshotFileType::Unknown => proto::SnapshotFileType::Unknown,
            SnapshotFileType::SqliteDb => proto::SnapshotFileType::SqliteDb,
            SnapshotFileType::HnswIndex => proto::SnapshotFileType::HnswIndex,
            SnapshotFileType::Wal => proto::SnapshotFileType::Wal,
        }
    }
}

impl From<proto::SnapshotFileType> for SnapshotFileType {
    fn from(t: proto::SnapshotFileType) -> Self {
        match t {
            proto::SnapshotFileType::Unknown => SnapshotFileType::Unknown,
            proto::SnapshotFileType::SqliteDb => SnapshotFileType::SqliteDb,
            proto::SnapshotFileType::HnswIndex => SnapshotFileType::HnswIndex,
            proto::SnapshotFileType::Wal => SnapshotFileType::Wal,
        }
    }
}

impl From<&SnapshotChunk> for proto::SnapshotChunkPb {
    fn from(chunk: &SnapshotChunk) -> Self {
        proto::SnapshotChunkPb {
            metadata: chunk.metadata.as_ref().map(|m| proto::SnapshotMetadataPb {
                snapshot_id: m.snapshot_id.clone(),
                created_at: m.created_at,
                total_size: m.total_size,
                files: m
                    .files
                    .iter()
                    .map(|f| proto::SnapshotFileInfoPb {
                        file_name: f.file_name.clone(),
                        file_type: proto::SnapshotFileType::from(f.file_type) as i32,
                        file_size: f.file_size,
                        checksum: f.checksum.clone(),
                    })
                    .collect(),
                version: m.version,
                checksum: m.checksum.clone(),
            }),
            file_chunk: chunk.file_chunk.as_ref().map(|fc| proto::FileChunkPb {
                file_name: fc.file_name.clone(),
                offset: fc.offset,
                data: fc.data.clone(),
                is_last_chunk: fc.is_last_chunk,
            }),
            sequence: chunk.sequence,
            is_final: chunk.is_final,
        }
    }
}

impl TryFrom<proto::SnapshotChunkPb> for SnapshotChunk {
    type Error = String;

    fn try_from(pb: proto::SnapshotChunkPb) -> std::result::Result<Self, String> {
        let metadata = pb.metadata.map(|m| SnapshotMetadata {
            snapshot_id: m.snapshot_id,
            created_at: m.created_at,
            total_size: m.total_size,
            files: m
                .files
                .into_iter()
                .map(|f| SnapshotFileInfo {
                    file_name: f.file_name,
                    file_type: proto::SnapshotFileType::try_from(f.file_type)
                        .unwrap_or(proto::SnapshotFileType::Unknown)
                        .into(),
                    file_size: f.file_size,
                    checksum: f.checksum,
                })
                .collect(),
            version: m.version,
            checksum: m.checksum,
        });
        let file_chunk = pb.file_chunk.map(|fc| FileChunk {
            file_name: fc.file_name,
            offset: fc.offset,
            data: fc.data,
            is_last_chunk: fc.is_last_chunk,
        });
        Ok(SnapshotChunk {
            metadata,
            file_chunk,
            sequence: pb.sequence,
            is_final: pb.is_final,
        })
    }
}
