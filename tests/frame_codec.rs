//! Frame codec tests: the snapshot byte stream must survive a write/read
//! round trip bit-for-bit, and every malformed stream must fail loudly.

use vecraft::consensus::codec::{
    self, FileChunk, SnapshotChunk, SnapshotFileInfo, SnapshotFileType, SnapshotMetadata,
};

/// A multi-file chunk stream resembling what the backend exports: one
/// database file and one index file, split into uneven chunks.
fn collector_chunks() -> Vec<SnapshotChunk> {
    let db = (0u16..600).flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>();
    let index = vec![7u8; 333];

    let mut chunks = vec![SnapshotChunk {
        metadata: Some(SnapshotMetadata {
            snapshot_id: "snap_1700000000000_0badcafe".to_string(),
            created_at: 1_700_000_000_000,
            total_size: (db.len() + index.len()) as u64,
            files: vec![
                SnapshotFileInfo {
                    file_name: "database.db".to_string(),
                    file_type: SnapshotFileType::SqliteDb,
                    file_size: db.len() as u64,
                    checksum: codec::sha256_hex(&db),
                },
                SnapshotFileInfo {
                    file_name: "index_0.idx".to_string(),
                    file_type: SnapshotFileType::HnswIndex,
                    file_size: index.len() as u64,
                    checksum: codec::sha256_hex(&index),
                },
            ],
            version: 1,
            checksum: String::new(),
        }),
        file_chunk: None,
        sequence: 0,
        is_final: false,
    }];

    let mut sequence = 1;
    for (name, data) in [("database.db", &db), ("index_0.idx", &index)] {
        let pieces: Vec<&[u8]> = data.chunks(256).collect();
        let total = pieces.len();
        for (i, piece) in pieces.into_iter().enumerate() {
            chunks.push(SnapshotChunk {
                metadata: None,
                file_chunk: Some(FileChunk {
                    file_name: name.to_string(),
                    offset: (i * 256) as u64,
                    data: piece.to_vec(),
                    is_last_chunk: i + 1 == total,
                }),
                sequence,
                is_final: false,
            });
            sequence += 1;
        }
    }
    chunks.last_mut().unwrap().is_final = true;
    chunks
}

#[test]
fn round_trip_is_bit_for_bit() {
    let chunks = collector_chunks();
    let encoded = codec::encode_stream(&chunks).unwrap();
    let decoded = codec::read_stream(&mut encoded.as_slice()).unwrap();
    assert_eq!(decoded, chunks);

    // Re-encoding the decoded sequence yields the identical byte stream.
    let re_encoded = codec::encode_stream(&decoded).unwrap();
    assert_eq!(re_encoded, encoded);

    codec::verify_chunks(&decoded).unwrap();
}

#[test]
fn reader_stops_at_final_chunk() {
    let chunks = collector_chunks();
    let mut encoded = codec::encode_stream(&chunks).unwrap();
    // Trailing bytes after the final chunk are never read.
    encoded.extend_from_slice(b"\xde\xad\xbe\xef");

    let decoded = codec::read_stream(&mut encoded.as_slice()).unwrap();
    assert_eq!(decoded.len(), chunks.len());
    assert!(decoded.last().unwrap().is_final);
}

#[test]
fn truncated_last_byte_fails() {
    let chunks = collector_chunks();
    let encoded = codec::encode_stream(&chunks).unwrap();
    let truncated = &encoded[..encoded.len() - 1];
    assert!(codec::read_stream(&mut &truncated[..]).is_err());
}

#[test]
fn length_prefix_without_payload_fails() {
    let chunks = collector_chunks();
    let mut encoded = codec::encode_stream(&chunks[..1]).unwrap();
    // A dangling length prefix announcing data that never arrives.
    encoded.extend_from_slice(&100u32.to_be_bytes());
    assert!(codec::read_stream(&mut encoded.as_slice()).is_err());
}

#[test]
fn undecodable_payload_fails() {
    let mut encoded = 11u32.to_be_bytes().to_vec();
    encoded.extend_from_slice(b"hello world");
    assert!(codec::read_stream(&mut encoded.as_slice()).is_err());
}

#[test]
fn empty_stream_decodes_to_nothing() {
    let decoded = codec::read_stream(&mut [].as_slice()).unwrap();
    assert!(decoded.is_empty());
    // ...but an empty sequence never verifies.
    assert!(codec::verify_chunks(&decoded).is_err());
}

#[test]
fn flipped_data_byte_fails_verification() {
    let mut chunks = collector_chunks();
    chunks[1].file_chunk.as_mut().unwrap().data[0] ^= 0x01;

    // Framing still round-trips; only verification catches the corruption.
    let encoded = codec::encode_stream(&chunks).unwrap();
    let decoded = codec::read_stream(&mut encoded.as_slice()).unwrap();
    assert!(codec::verify_chunks(&decoded).is_err());
}
