//! Replica store: Raft log, stable state, snapshots, and the state machine.
//!
//! One store per node, split across two RocksDB instances (`raft-log.db` for
//! entries, `raft-stable.db` for vote / applied / membership state) and a
//! `snapshots/` directory holding the latest framed snapshot stream. The
//! state machine half forwards committed commands to the colocated vector
//! store; it is the single writer to the backend.
//!
//! Apply is driven serially by the consensus core in log order. A committed
//! entry is never skipped or reinterpreted: benign backend rejections are
//! reported back to the proposer, and only outcomes that would leave this
//! replica diverged (schema conflict, unreachable backend) halt the node.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use openraft::storage::{LogState, Snapshot};
use openraft::{
    AnyError, BasicNode, Entry, EntryPayload, ErrorSubject, ErrorVerb, LogId, RaftLogReader,
    RaftSnapshotBuilder, RaftStorage, SnapshotMeta, StorageError, StorageIOError,
    StoredMembership, Vote,
};
use rocksdb::{Direction, IteratorMode, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{BackendClient, BackendError, CollectionCatalog};
use crate::consensus::codec;
use crate::consensus::command::{Command, CommandResponse};
use crate::consensus::{NodeId, TypeConfig};

const CF_LOGS: &str = "logs";
const CF_META: &str = "meta";

const KEY_LAST_PURGED: &[u8] = b"last_purged";
const KEY_VOTE: &[u8] = b"vote";
const KEY_LAST_APPLIED: &[u8] = b"last_applied";
const KEY_MEMBERSHIP: &[u8] = b"membership";

const SNAPSHOT_DATA_FILE: &str = "current.snap";
const SNAPSHOT_META_FILE: &str = "current.meta.json";

type SE = StorageError<NodeId>;

fn io_err<E: std::error::Error + 'static>(
    subject: ErrorSubject<NodeId>,
    verb: ErrorVerb,
    e: &E,
) -> SE {
    StorageError::IO {
        source: StorageIOError::new(subject, verb, AnyError::new(e)),
    }
}

fn store_read_err<E: std::error::Error + 'static>(e: &E) -> SE {
    io_err(ErrorSubject::Store, ErrorVerb::Read, e)
}

fn store_write_err<E: std::error::Error + 'static>(e: &E) -> SE {
    io_err(ErrorSubject::Store, ErrorVerb::Write, e)
}

fn log_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

#[derive(Clone)]
pub struct ReplicaStore {
    log_db: Arc<DB>,
    stable_db: Arc<DB>,
    snapshot_dir: PathBuf,
    backend: BackendClient,
    catalog: CollectionCatalog,
    snapshot_chunk_size: u32,
}

impl ReplicaStore {
    pub fn open(
        dir: &Path,
        backend: BackendClient,
        catalog: CollectionCatalog,
        snapshot_chunk_size: u32,
    ) -> crate::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let log_db = DB::open_cf(&opts, dir.join("raft-log.db"), vec![CF_LOGS, CF_META])?;
        let stable_db = DB::open(&opts, dir.join("raft-stable.db"))?;

        let snapshot_dir = dir.join("snapshots");
        std::fs::create_dir_all(&snapshot_dir)?;

        Ok(Self {
            log_db: Arc::new(log_db),
            stable_db: Arc::new(stable_db),
            snapshot_dir,
            backend,
            catalog,
            snapshot_chunk_size,
        })
    }

    fn logs_cf(&self) -> &rocksdb::ColumnFamily {
        self.log_db.cf_handle(CF_LOGS).unwrap()
    }

    fn meta_cf(&self) -> &rocksdb::ColumnFamily {
        self.log_db.cf_handle(CF_META).unwrap()
    }

    fn get_stable<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, SE> {
        match self.stable_db.get(key).map_err(|e| store_read_err(&e))? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| store_read_err(&e))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_stable<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), SE> {
        let bytes = serde_json::to_vec(value).map_err(|e| store_write_err(&e))?;
        self.stable_db
            .put(key, bytes)
            .map_err(|e| store_write_err(&e))
    }

    fn read_last_applied(&self) -> Result<Option<LogId<NodeId>>, SE> {
        Ok(self.get_stable::<LogId<NodeId>>(KEY_LAST_APPLIED)?)
    }

    fn save_last_applied(&self, log_id: &LogId<NodeId>) -> Result<(), SE> {
        self.put_stable(KEY_LAST_APPLIED, log_id)
    }

    fn read_membership(&self) -> Result<StoredMembership<NodeId, BasicNode>, SE> {
        Ok(self
            .get_stable::<StoredMembership<NodeId, BasicNode>>(KEY_MEMBERSHIP)?
            .unwrap_or_default())
    }

    fn save_membership(&self, membership: &StoredMembership<NodeId, BasicNode>) -> Result<(), SE> {
        self.put_stable(KEY_MEMBERSHIP, membership)
    }

    fn snapshot_data_path(&self) -> PathBuf {
        self.snapshot_dir.join(SNAPSHOT_DATA_FILE)
    }

    fn snapshot_meta_path(&self) -> PathBuf {
        self.snapshot_dir.join(SNAPSHOT_META_FILE)
    }

    fn persist_snapshot_files(
        &self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        data: &[u8],
    ) -> Result<(), SE> {
        let sig = meta.signature();
        std::fs::write(self.snapshot_data_path(), data)
            .map_err(|e| io_err(ErrorSubject::Snapshot(Some(sig.clone())), ErrorVerb::Write, &e))?;
        let meta_bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| io_err(ErrorSubject::Snapshot(Some(sig.clone())), ErrorVerb::Write, &e))?;
        std::fs::write(self.snapshot_meta_path(), meta_bytes)
            .map_err(|e| io_err(ErrorSubject::Snapshot(Some(sig)), ErrorVerb::Write, &e))?;
        Ok(())
    }

    /// Apply one committed command to the backend.
    ///
    /// Idempotent outcomes are success: a replayed `CreateCollection` with the
    /// same schema, an `Insert` with an id the backend already holds, and a
    /// `Delete`/`DropCollection` of an absent target. A schema conflict means
    /// this replica's state disagrees with the log; an unreachable backend
    /// means the entry cannot take effect here. Both halt the node rather
    /// than silently diverge.
    async fn apply_command(&self, cmd: &Command) -> Result<CommandResponse, SE> {
        tracing::debug!(
            kind = cmd.kind(),
            collection = cmd.collection_name(),
            "applying command"
        );

        match cmd {
            Command::CreateCollection(p) => {
                let spec = p.spec();
                match self.backend.create_collection(&spec).await {
                    Ok(()) => {
                        self.catalog.put(spec);
                        Ok(CommandResponse::ok("collection created"))
                    }
                    Err(BackendError::AlreadyExists(_)) => {
                        self.catalog.put(spec);
                        Ok(CommandResponse::ok("collection already exists"))
                    }
                    Err(e @ BackendError::SchemaConflict(_)) => Err(self.divergence(cmd, &e)),
                    Err(e) if e.is_transient() => Err(self.apply_stalled(cmd, &e)),
                    Err(e) => Ok(CommandResponse::fail("create_collection", e)),
                }
            }
            Command::Insert(p) => {
                match self
                    .backend
                    .insert(&p.collection_name, p.id, &p.vector, &p.payload_insert_query)
                    .await
                {
                    Ok(()) => Ok(CommandResponse::ok("inserted")),
                    Err(BackendError::AlreadyExists(_)) => {
                        Ok(CommandResponse::ok("duplicate id, already applied"))
                    }
                    Err(e) if e.is_transient() => Err(self.apply_stalled(cmd, &e)),
                    Err(e) => Ok(CommandResponse::fail("insert", e)),
                }
            }
            Command::Delete(p) => match self.backend.delete(&p.collection_name, p.id).await {
                Ok(()) | Err(BackendError::NotFound(_)) => Ok(CommandResponse::ok("deleted")),
                Err(e) if e.is_transient() => Err(self.apply_stalled(cmd, &e)),
                Err(e) => Ok(CommandResponse::fail("delete", e)),
            },
            Command::DropCollection(p) => {
                match self.backend.drop_collection(&p.collection_name).await {
                    Ok(()) | Err(BackendError::NotFound(_)) => {
                        self.catalog.remove(&p.collection_name);
                        Ok(CommandResponse::ok("collection dropped"))
                    }
                    Err(e) if e.is_transient() => Err(self.apply_stalled(cmd, &e)),
                    Err(e) => Ok(CommandResponse::fail("drop_collection", e)),
                }
            }
        }
    }

    fn divergence(&self, cmd: &Command, e: &BackendError) -> SE {
        tracing::error!(
            kind = cmd.kind(),
            collection = cmd.collection_name(),
            error = %e,
            "replica diverged from the committed log, halting"
        );
        StorageError::IO {
            source: StorageIOError::new(
                ErrorSubject::StateMachine,
                ErrorVerb::Write,
                AnyError::error(format!("replica divergence on {}: {}", cmd.kind(), e)),
            ),
        }
    }

    fn apply_stalled(&self, cmd: &Command, e: &BackendError) -> SE {
        tracing::error!(
            kind = cmd.kind(),
            collection = cmd.collection_name(),
            error = %e,
            "backend unreachable while applying a committed entry, halting"
        );
        StorageError::IO {
            source: StorageIOError::new(
                ErrorSubject::StateMachine,
                ErrorVerb::Write,
                AnyError::error(format!("backend unreachable applying {}: {}", cmd.kind(), e)),
            ),
        }
    }
}

impl RaftLogReader<TypeConfig> for ReplicaStore {
    async fn try_get_log_entries<R>(&mut self, range: R) -> Result<Vec<Entry<TypeConfig>>, SE>
    where
        R: std::ops::RangeBounds<u64>,
    {
        let start = match range.start_bound() {
            std::ops::Bound::Included(i) => *i,
            std::ops::Bound::Excluded(i) => i + 1,
            std::ops::Bound::Unbounded => 0,
        };

        let start_key = log_key(start);
        let cf = self.logs_cf();
        let iter = self
            .log_db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| store_read_err(&e))?;
            let index = u64::from_be_bytes(key.as_ref().try_into().map_err(
                |e: std::array::TryFromSliceError| store_read_err(&e),
            )?);
            if !range.contains(&index) {
                break;
            }
            let entry: Entry<TypeConfig> =
                serde_json::from_slice(&value).map_err(|e| store_read_err(&e))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

impl RaftStorage<TypeConfig> for ReplicaStore {
    type LogReader = Self;
    type SnapshotBuilder = Self;

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, SE> {
        let last_purged: Option<LogId<NodeId>> = match self
            .log_db
            .get_cf(self.meta_cf(), KEY_LAST_PURGED)
            .map_err(|e| store_read_err(&e))?
        {
            Some(bytes) => {
                Some(serde_json::from_slice(&bytes).map_err(|e| store_read_err(&e))?)
            }
            None => None,
        };

        let mut iter = self.log_db.iterator_cf(self.logs_cf(), IteratorMode::End);
        let last_log = match iter.next() {
            Some(item) => {
                let (_, value) = item.map_err(|e| store_read_err(&e))?;
                let entry: Entry<TypeConfig> =
                    serde_json::from_slice(&value).map_err(|e| store_read_err(&e))?;
                Some(entry.log_id)
            }
            None => None,
        };

        let last_log_id = last_log.or_else(|| last_purged.clone());
        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id,
        })
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), SE> {
        let bytes = serde_json::to_vec(vote)
            .map_err(|e| io_err(ErrorSubject::Vote, ErrorVerb::Write, &e))?;
        self.stable_db
            .put(KEY_VOTE, bytes)
            .map_err(|e| io_err(ErrorSubject::Vote, ErrorVerb::Write, &e))
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, SE> {
        match self
            .stable_db
            .get(KEY_VOTE)
            .map_err(|e| io_err(ErrorSubject::Vote, ErrorVerb::Read, &e))?
        {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| io_err(ErrorSubject::Vote, ErrorVerb::Read, &e))?,
            )),
            None => Ok(None),
        }
    }

    async fn append_to_log<I>(&mut self, entries: I) -> Result<(), SE>
    where
        I: IntoIterator<Item = Entry<TypeConfig>>,
    {
        let cf = self.logs_cf();
        for entry in entries {
            let bytes = serde_json::to_vec(&entry).map_err(|e| store_write_err(&e))?;
            self.log_db
                .put_cf(cf, log_key(entry.log_id.index), bytes)
                .map_err(|e| store_write_err(&e))?;
        }
        Ok(())
    }

    async fn delete_conflict_logs_since(&mut self, log_id: LogId<NodeId>) -> Result<(), SE> {
        let start_key = log_key(log_id.index);
        let cf = self.logs_cf();
        let iter = self
            .log_db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));
        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| store_read_err(&e))?;
            keys.push(key);
        }
        for key in keys {
            self.log_db
                .delete_cf(cf, key)
                .map_err(|e| store_write_err(&e))?;
        }
        Ok(())
    }

    async fn purge_logs_upto(&mut self, log_id: LogId<NodeId>) -> Result<(), SE> {
        let bytes = serde_json::to_vec(&log_id).map_err(|e| store_write_err(&e))?;
        self.log_db
            .put_cf(self.meta_cf(), KEY_LAST_PURGED, bytes)
            .map_err(|e| store_write_err(&e))?;

        let cf = self.logs_cf();
        let iter = self.log_db.iterator_cf(cf, IteratorMode::Start);
        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| store_read_err(&e))?;
            let index = u64::from_be_bytes(key.as_ref().try_into().map_err(
                |e: std::array::TryFromSliceError| store_read_err(&e),
            )?);
            if index > log_id.index {
                break;
            }
            keys.push(key);
        }
        for key in keys {
            self.log_db
                .delete_cf(cf, key)
                .map_err(|e| store_write_err(&e))?;
        }
        Ok(())
    }

    async fn last_applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>), SE> {
        Ok((self.read_last_applied()?, self.read_membership()?))
    }

    async fn apply_to_state_machine(
        &mut self,
        entries: &[Entry<TypeConfig>],
    ) -> Result<Vec<CommandResponse>, SE> {
        let mut responses = Vec::with_capacity(entries.len());

        for entry in entries {
            let response = match &entry.payload {
                EntryPayload::Blank => CommandResponse::ok(""),
                EntryPayload::Normal(cmd) => self.apply_command(cmd).await?,
                EntryPayload::Membership(mem) => {
                    let stored = StoredMembership::new(Some(entry.log_id.clone()), mem.clone());
                    self.save_membership(&stored)?;
                    CommandResponse::ok("membership change")
                }
            };
            self.save_last_applied(&entry.log_id)?;
            responses.push(response);
        }
        Ok(responses)
    }

    async fn begin_receiving_snapshot(&mut self) -> Result<Box<Cursor<Vec<u8>>>, SE> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), SE> {
        tracing::info!(snapshot_id = %meta.snapshot_id, "installing snapshot");

        let sig = meta.signature();

        // Decode and verify everything before the backend is touched. A
        // truncated or corrupt stream fails here and leaves the replica in
        // its pre-restore state.
        let data = snapshot.into_inner();
        let chunks = codec::read_stream(&mut data.as_slice())
            .map_err(|e| io_err(ErrorSubject::Snapshot(Some(sig.clone())), ErrorVerb::Write, &e))?;
        codec::verify_chunks(&chunks)
            .map_err(|e| io_err(ErrorSubject::Snapshot(Some(sig.clone())), ErrorVerb::Write, &e))?;

        self.backend
            .import_snapshot(&chunks)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(Some(sig)), ErrorVerb::Write, &e))?;

        // The restored backend state is opaque; the catalog refills as
        // post-snapshot entries are applied.
        self.catalog.clear();

        self.save_membership(&meta.last_membership)?;
        if let Some(last) = &meta.last_log_id {
            self.save_last_applied(last)?;
            let bytes = serde_json::to_vec(last).map_err(|e| store_write_err(&e))?;
            self.log_db
                .put_cf(self.meta_cf(), KEY_LAST_PURGED, bytes)
                .map_err(|e| store_write_err(&e))?;
        }

        self.persist_snapshot_files(meta, &data)?;

        tracing::info!(
            snapshot_id = %meta.snapshot_id,
            chunks = chunks.len(),
            "snapshot installed"
        );
        Ok(())
    }

    async fn get_current_snapshot(&mut self) -> Result<Option<Snapshot<TypeConfig>>, SE> {
        let meta_path = self.snapshot_meta_path();
        let data_path = self.snapshot_data_path();
        if !meta_path.exists() || !data_path.exists() {
            return Ok(None);
        }

        let meta_bytes = std::fs::read(meta_path).map_err(|e| store_read_err(&e))?;
        let meta: SnapshotMeta<NodeId, BasicNode> =
            serde_json::from_slice(&meta_bytes).map_err(|e| store_read_err(&e))?;
        let data = std::fs::read(data_path).map_err(|e| store_read_err(&e))?;

        Ok(Some(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        }))
    }
}

impl RaftSnapshotBuilder<TypeConfig> for ReplicaStore {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, SE> {
        let chunks = self
            .backend
            .export_snapshot(self.snapshot_chunk_size, true)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Read, &e))?;
        let data = codec::encode_stream(&chunks)
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Read, &e))?;

        let meta = SnapshotMeta {
            last_log_id: self.read_last_applied()?,
            last_membership: self.read_membership()?,
            snapshot_id: uuid::Uuid::new_v4().to_string(),
        };

        self.persist_snapshot_files(&meta, &data)?;

        tracing::info!(
            snapshot_id = %meta.snapshot_id,
            chunks = chunks.len(),
            bytes = data.len(),
            "snapshot built"
        );

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::CommittedLeaderId;
    use tempfile::tempdir;

    fn open_store(dir: &Path) -> ReplicaStore {
        // A lazy channel never dials until used; log and vote tests do not
        // touch the backend.
        let backend = BackendClient::connect_lazy("http://127.0.0.1:1").unwrap();
        ReplicaStore::open(dir, backend, CollectionCatalog::new(), 256 * 1024).unwrap()
    }

    fn log_id(term: u64, index: u64) -> LogId<NodeId> {
        LogId::new(CommittedLeaderId::new(term, "node1".to_string()), index)
    }

    fn blank_entry(term: u64, index: u64) -> Entry<TypeConfig> {
        Entry {
            log_id: log_id(term, index),
            payload: EntryPayload::Blank,
        }
    }

    #[tokio::test]
    async fn test_vote_survives_reopen() {
        let dir = tempdir().unwrap();
        let vote = Vote::new(3, "node1".to_string());

        {
            let mut store = open_store(dir.path());
            store.save_vote(&vote).await.unwrap();
            assert_eq!(store.read_vote().await.unwrap(), Some(vote.clone()));
        }

        let mut store = open_store(dir.path());
        assert_eq!(store.read_vote().await.unwrap(), Some(vote));
    }

    #[tokio::test]
    async fn test_log_append_read_purge() {
        let dir = tempdir().unwrap();
        let mut store = open_store(dir.path());

        store
            .append_to_log((1..=5).map(|i| blank_entry(1, i)))
            .await
            .unwrap();

        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id, Some(log_id(1, 5)));
        assert_eq!(state.last_purged_log_id, None);

        let entries = store.try_get_log_entries(2..=4).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].log_id.index, 2);
        assert_eq!(entries[2].log_id.index, 4);

        store.purge_logs_upto(log_id(1, 3)).await.unwrap();
        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_purged_log_id, Some(log_id(1, 3)));
        assert_eq!(state.last_log_id, Some(log_id(1, 5)));

        let entries = store.try_get_log_entries(0..).await.unwrap();
        assert_eq!(entries.first().map(|e| e.log_id.index), Some(4));
    }

    #[tokio::test]
    async fn test_conflict_truncation() {
        let dir = tempdir().unwrap();
        let mut store = open_store(dir.path());

        store
            .append_to_log((1..=5).map(|i| blank_entry(1, i)))
            .await
            .unwrap();
        store
            .delete_conflict_logs_since(log_id(1, 3))
            .await
            .unwrap();

        let entries = store.try_get_log_entries(0..).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.last().map(|e| e.log_id.index), Some(2));
    }

    #[tokio::test]
    async fn test_last_applied_state_defaults() {
        let dir = tempdir().unwrap();
        let mut store = open_store(dir.path());

        let (applied, membership) = store.last_applied_state().await.unwrap();
        assert_eq!(applied, None);
        assert_eq!(membership, StoredMembership::default());
    }
}
