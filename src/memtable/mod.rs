//! # MemTable Module
//!
//! The engine's write buffer: a local **ordered key-value store** keyed by
//! `stream ‖ lex(id)` and made durable by a per-memtable [WAL](crate::wal).
//! Because the id suffix is the fixed-width lexicographic time-UUID form,
//! row-major iteration of the store yields streams in name order and, within
//! a stream, records in ascending time order.
//!
//! ## Design Invariants
//!
//! - Every mutation is WAL-first; replaying the log reconstructs the exact
//!   in-memory state after a crash.
//! - `insert` overwrites any existing record at the same `(stream, id)` key.
//! - `delete(stream, start_id, end_id)` wipes the covered keys locally and
//!   then inserts a [`DeleteRecord`] at `start_id`. The local wipe is an
//!   optimization; the tombstone is the correctness carrier, because it
//!   must survive the flush and shadow older events already sitting in
//!   SSTables.
//! - `get` on an absent key answers `Ok(None)`, never an error.
//!
//! ## Lifecycle
//!
//! A memtable is **Active** (accepting writes) until the engine seals it
//! during rotation; a **Sealed** memtable rejects writes, is pushed to the
//! bucket stream-by-stream, and is finally **destroyed** (its log deleted).
//! Readers that still hold a reference during a rotation keep a consistent
//! snapshot — sealing only stops new writes.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::record::{DeleteRecord, Record, RecordError};
use crate::timeuuid::{LEX_LEN, TimeUuid, now_ticks};
use crate::wal::{Wal, WalError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`MemTable`] operations.
#[derive(Debug, Error)]
pub enum MemTableError {
    /// The local store (WAL file) is unavailable or failing.
    #[error("local storage unavailable: {0}")]
    StorageUnavailable(#[from] WalError),

    /// Record marshalling failed.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Write attempted against a sealed memtable.
    #[error("memtable {0} is sealed")]
    Sealed(u64),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// WAL operations
// ------------------------------------------------------------------------------------------------

/// A logical WAL record representing one memtable mutation.
///
/// Replaying these in order reconstructs the store byte-for-byte.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
enum MemTableOp {
    /// Insert or overwrite a single composite key.
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Remove every key in the **inclusive** range `[start, end]`.
    Wipe { start: Vec<u8>, end: Vec<u8> },
}

// ------------------------------------------------------------------------------------------------
// MemTable Core
// ------------------------------------------------------------------------------------------------

/// The mutable, WAL-durable write buffer of the storage engine.
///
/// # Concurrency
/// - Writers acquire an exclusive lock on the tree.
/// - Readers may proceed concurrently and snapshot their result sets.
pub struct MemTable {
    /// Creation tick count; doubles as the on-disk log name and as the
    /// `memtable_id` metadata attribute of every SSTable flushed from here.
    id: u64,

    /// Composite key → marshalled record.
    tree: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,

    /// Associated write-ahead log for durability.
    wal: Wal<MemTableOp>,

    /// Set once the engine rotates this memtable out of the active slot.
    sealed: AtomicBool,
}

/// Builds the composite store key for `(stream, id)`.
pub fn composite_key(stream: &str, id: &TimeUuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(stream.len() + LEX_LEN);
    key.extend_from_slice(stream.as_bytes());
    key.extend_from_slice(id.to_lex().as_bytes());
    key
}

/// Splits a composite key back into `(stream, id)`.
fn split_key(key: &[u8]) -> Result<(String, TimeUuid), MemTableError> {
    if key.len() < LEX_LEN {
        return Err(MemTableError::Internal(format!(
            "composite key shorter than id suffix: {} bytes",
            key.len()
        )));
    }
    let (stream, lex) = key.split_at(key.len() - LEX_LEN);
    let stream = String::from_utf8(stream.to_vec())
        .map_err(|_| MemTableError::Internal("non-utf8 stream name in key".into()))?;
    let id = TimeUuid::from_lex(lex)
        .map_err(|e| MemTableError::Internal(format!("bad id suffix in key: {e}")))?;
    Ok((stream, id))
}

impl MemTable {
    /// Creates a fresh memtable inside `dir`, named by its creation tick.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, MemTableError> {
        // A rotation can mint two memtables within one clock tick; bump
        // until the log name is unused.
        let mut id = now_ticks();
        let mut path = dir.as_ref().join(Wal::<MemTableOp>::file_name(id));
        while path.exists() {
            id += 1;
            path = dir.as_ref().join(Wal::<MemTableOp>::file_name(id));
        }
        info!(id, path = %path.display(), "creating memtable");

        let wal = Wal::open(&path, None)?;
        Ok(Self {
            id,
            tree: RwLock::new(BTreeMap::new()),
            wal,
            sealed: AtomicBool::new(false),
        })
    }

    /// Reopens a surviving memtable log, replaying it into memory.
    ///
    /// Used by crash recovery; the result starts out **sealed** because a
    /// recovered memtable only exists to be pushed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemTableError> {
        let path = path.as_ref();
        let wal: Wal<MemTableOp> = Wal::open(path, None)?;
        let id = wal.memtable_id();
        info!(id, path = %path.display(), "replaying memtable log");

        let mut tree = BTreeMap::new();
        let mut replayed = 0usize;
        for op in wal.replay_iter()? {
            match op? {
                MemTableOp::Put { key, value } => {
                    tree.insert(key, value);
                }
                MemTableOp::Wipe { start, end } => {
                    if start <= end {
                        let doomed: Vec<Vec<u8>> =
                            tree.range(start..=end).map(|(k, _)| k.clone()).collect();
                        for key in doomed {
                            tree.remove(&key);
                        }
                    }
                }
            }
            replayed += 1;
        }

        debug!(id, replayed, entries = tree.len(), "memtable log replayed");

        Ok(Self {
            id,
            tree: RwLock::new(tree),
            wal,
            sealed: AtomicBool::new(true),
        })
    }

    /// Returns the memtable id (creation tick count).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path of the backing log file.
    pub fn path(&self) -> &Path {
        self.wal.path()
    }

    /// Marks this memtable read-only. Idempotent.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// True once [`seal`](Self::seal) has been called.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), MemTableError> {
        if self.is_sealed() {
            return Err(MemTableError::Sealed(self.id));
        }
        Ok(())
    }

    /// Inserts a record under `(stream, record.id())`, overwriting any
    /// previous record at that key.
    pub fn insert(&self, stream: &str, record: &Record) -> Result<(), MemTableError> {
        self.check_writable()?;
        let key = composite_key(stream, &record.id());
        let value = record.marshal()?;

        trace!(stream, id = %record.id(), "memtable insert");

        let mut guard = self
            .tree
            .write()
            .map_err(|_| MemTableError::Internal("RwLock poisoned".into()))?;

        // 1. WAL first (crash safety)
        self.wal.append(&MemTableOp::Put {
            key: key.clone(),
            value: value.clone(),
        })?;

        // 2. In-memory update
        guard.insert(key, value);
        Ok(())
    }

    /// Fetches the record stored at `(stream, id)`, if any.
    pub fn get(&self, stream: &str, id: &TimeUuid) -> Result<Option<Record>, MemTableError> {
        let guard = self
            .tree
            .read()
            .map_err(|_| MemTableError::Internal("RwLock poisoned".into()))?;

        match guard.get(&composite_key(stream, id)) {
            Some(bytes) => Ok(Some(Record::unmarshal(bytes)?)),
            None => Ok(None),
        }
    }

    /// Deletes every record with `id ∈ [start_id, end_id]` from the local
    /// store, then records a tombstone at `start_id`.
    ///
    /// Returns the number of locally wiped entries. Events already flushed
    /// to SSTables are not counted here — the tombstone shadows them at
    /// read time.
    pub fn delete(
        &self,
        stream: &str,
        start_id: TimeUuid,
        end_id: TimeUuid,
    ) -> Result<usize, MemTableError> {
        self.check_writable()?;
        if start_id > end_id {
            return Ok(0);
        }
        let start = composite_key(stream, &start_id);
        let end = composite_key(stream, &end_id);
        let tombstone = Record::Delete(DeleteRecord::new(start_id, end_id));
        let value = tombstone.marshal()?;

        debug!(stream, start = %start_id, end = %end_id, "memtable range delete");

        let mut guard = self
            .tree
            .write()
            .map_err(|_| MemTableError::Internal("RwLock poisoned".into()))?;

        // 1. WAL first (crash safety)
        self.wal.append(&MemTableOp::Wipe {
            start: start.clone(),
            end: end.clone(),
        })?;
        self.wal.append(&MemTableOp::Put {
            key: start.clone(),
            value: value.clone(),
        })?;

        // 2. In-memory update
        let doomed: Vec<Vec<u8>> = guard
            .range(start.clone()..=end)
            .map(|(k, _)| k.clone())
            .collect();
        let wiped = doomed.len();
        for key in doomed {
            guard.remove(&key);
        }
        guard.insert(start, value);

        Ok(wiped)
    }

    /// Yields the records of one stream with `id ∈ [lo, hi]` (inclusive
    /// bounds, [`TimeUuid::MIN`]/[`TimeUuid::MAX`] when absent) in
    /// ascending time order.
    ///
    /// The result is a snapshot: rotation or later writes do not disturb an
    /// iterator already handed out.
    pub fn stream_iter(
        &self,
        stream: &str,
        lo: Option<TimeUuid>,
        hi: Option<TimeUuid>,
    ) -> Result<std::vec::IntoIter<Record>, MemTableError> {
        let lo = composite_key(stream, &lo.unwrap_or(TimeUuid::MIN));
        let hi = composite_key(stream, &hi.unwrap_or(TimeUuid::MAX));
        if lo > hi {
            return Ok(Vec::new().into_iter());
        }

        let guard = self
            .tree
            .read()
            .map_err(|_| MemTableError::Internal("RwLock poisoned".into()))?;

        let mut records = Vec::new();
        for (_key, value) in guard.range(lo..=hi) {
            records.push(Record::unmarshal(value)?);
        }
        Ok(records.into_iter())
    }

    /// Yields `(stream, records)` pairs, streams in lexicographic order and
    /// records within a stream in ascending time order.
    pub fn streams_iter(
        &self,
    ) -> Result<impl Iterator<Item = (String, std::vec::IntoIter<Record>)>, MemTableError> {
        let guard = self
            .tree
            .read()
            .map_err(|_| MemTableError::Internal("RwLock poisoned".into()))?;

        // Group via an ordered map keyed by the parsed stream name rather
        // than relying on prefix contiguity of the raw key order.
        let mut streams: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for (key, value) in guard.iter() {
            let (stream, _) = split_key(key)?;
            streams
                .entry(stream)
                .or_default()
                .push(Record::unmarshal(value)?);
        }

        Ok(streams
            .into_iter()
            .map(|(stream, records)| (stream, records.into_iter())))
    }

    /// Collects the tombstones of `stream` overlapping `[lo, hi]`.
    ///
    /// A tombstone sorts at its start id, which may lie below `lo` while
    /// its range still covers the query, so the walk starts at the
    /// stream's beginning. Memtables are size-bounded, which keeps this
    /// affordable.
    pub fn delete_records(
        &self,
        stream: &str,
        lo: Option<&TimeUuid>,
        hi: Option<&TimeUuid>,
    ) -> Result<Vec<DeleteRecord>, MemTableError> {
        let walk_hi = hi.copied().unwrap_or(TimeUuid::MAX);
        let mut out = Vec::new();
        for record in self.stream_iter(stream, None, Some(walk_hi))? {
            if let Record::Delete(tomb) = record {
                let before_lo = lo.is_some_and(|lo| tomb.end_id < *lo);
                if !before_lo {
                    out.push(tomb);
                }
            }
        }
        Ok(out)
    }

    /// Names of all streams with at least one record buffered here.
    pub fn streams(&self) -> Result<Vec<String>, MemTableError> {
        let guard = self
            .tree
            .read()
            .map_err(|_| MemTableError::Internal("RwLock poisoned".into()))?;

        let mut names: Vec<String> = Vec::new();
        for key in guard.keys() {
            let (stream, _) = split_key(key)?;
            if names.last().map(String::as_str) != Some(stream.as_str()) {
                names.push(stream);
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// True when no records are buffered.
    pub fn is_empty(&self) -> Result<bool, MemTableError> {
        let guard = self
            .tree
            .read()
            .map_err(|_| MemTableError::Internal("RwLock poisoned".into()))?;
        Ok(guard.is_empty())
    }

    /// Total bytes this memtable occupies on disk.
    pub fn size(&self) -> Result<u64, MemTableError> {
        Ok(self.wal.file_size()?)
    }

    /// Deletes the backing log. The memtable must already be fully pushed;
    /// in-flight readers keep their in-memory snapshot.
    pub fn destroy(&self) -> Result<(), MemTableError> {
        info!(id = self.id, "destroying memtable");
        self.wal.remove()?;
        Ok(())
    }
}
