//! # Stream Engine
//!
//! The engine ties the storage pipeline together and fronts it with the
//! backend façade the router exposes:
//!
//! 1. **Writes** land in the active [`MemTable`] (WAL-durable, one per
//!    namespace). When it outgrows its size bound it is rotated: sealed,
//!    queued, and pushed to the bucket by the background
//!    [flusher](flusher) — one SSTable per stream.
//! 2. **Reads** merge the active memtable, any sealed memtables still
//!    awaiting push, and every SSTable whose interval overlaps the query
//!    (via the [`Manifest`]) with a k-way heap merge, reconciling
//!    tombstones in-stream.
//! 3. **Deletes** write a range tombstone into the active memtable and
//!    ride the normal flush path.
//!
//! ## Concurrency model
//!
//! - The active memtable pointer is swapped only by rotation; every
//!   operation snapshots it (an `Arc`) up front and works against that
//!   snapshot, so in-flight scans survive rotation.
//! - The manifest view is replaced wholesale on refresh; scans pin the
//!   pre-refresh view.
//! - A single flusher thread consumes the sealed queue, so one sealed
//!   memtable is never pushed twice concurrently.
//!
//! ## Durability contract
//!
//! A successful `insert` means durable in the **local** memtable WAL, not
//! in the bucket; bucket durability follows once the corresponding flush
//! completes. On restart, surviving memtable logs are re-queued for push
//! before the fresh active memtable accepts writes.
//!
//! ## Façade
//!
//! [`Storage`] is the backend seam: [`ObjectStorage`] implements it on
//! top of per-namespace [`StreamEngine`]s, and [`Router`] picks a backend
//! per `(namespace, stream)` after validating backend settings.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

mod flusher;
pub mod merge;

#[cfg(test)]
mod tests;

pub use merge::{MergeIterator, RecordStream, TombstoneFilter};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::{HashMap, VecDeque},
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, RwLock},
};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bucket::{Bucket, BucketError};
use crate::manifest::{Manifest, ManifestError};
use crate::memtable::{MemTable, MemTableError};
use crate::record::{
    DeleteRecord, EventRecord, ID_FIELD, Record, RecordError, TIMESTAMP_FIELD,
};
use crate::sstable::{SSTableError, SstConfig};
use crate::timeuuid::{EntropyKind, TimeUuid, now_ticks};
use crate::wal::Wal;

use flusher::Flusher;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by engine and façade operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A configuration option was unknown or failed validation.
    #[error("bad settings: {0}")]
    BadSettings(String),

    /// The namespace is not served by this backend.
    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),

    /// The sealed-memtable queue is full; rotation must wait for pushes.
    #[error("flush queue full")]
    FlushQueueFull,

    /// Local write buffer failure.
    #[error(transparent)]
    MemTable(#[from] MemTableError),

    /// SSTable read or write failure.
    #[error(transparent)]
    SSTable(#[from] SSTableError),

    /// Manifest failure.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Record construction or marshalling failure.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Bucket failure outside the SSTable layer.
    #[error(transparent)]
    Bucket(#[from] BucketError),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Result ordering & request options
// ------------------------------------------------------------------------------------------------

/// Direction of a retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultOrder {
    /// Oldest first.
    #[default]
    Ascending,

    /// Newest first.
    Descending,
}

/// Parameters of a [`Storage::retrieve`] call.
///
/// Bounds follow the half-open time-range convention of the API: an
/// ascending retrieve covers `[start_time, end_time)`, a descending one
/// `(start_time, end_time]`. An explicit `start_id` replaces the lower
/// time bound and is **exclusive** — it is the reconnect cursor ("resume
/// after the last id I saw"). An explicit `end_id` replaces the upper
/// bound and is inclusive.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Lower time bound in ticks.
    pub start_time: u64,

    /// Upper time bound in ticks.
    pub end_time: u64,

    /// Exclusive lower id bound overriding `start_time`.
    pub start_id: Option<TimeUuid>,

    /// Inclusive upper id bound overriding `end_time`.
    pub end_id: Option<TimeUuid>,

    /// Scan direction.
    pub order: ResultOrder,

    /// Maximum number of events to yield.
    pub limit: Option<usize>,

    /// When set, tables that cannot be read are skipped and the scan
    /// returns the subset it could read. Default is fail-fast: the first
    /// unreadable table aborts the retrieve.
    pub lossy: bool,
}

/// Parameters of a [`Storage::delete`] call. Bounds as in
/// [`RetrieveOptions`], except the upper time bound is closed (a delete
/// for `[t0, t1]` covers every event stamped `t1`).
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Lower time bound in ticks.
    pub start_time: u64,

    /// Upper time bound in ticks.
    pub end_time: u64,

    /// Lower id bound overriding `start_time`.
    pub start_id: Option<TimeUuid>,

    /// Upper id bound overriding `end_time`.
    pub end_id: Option<TimeUuid>,
}

/// JSON-serialized events, in request order.
pub type EventStream = Box<dyn Iterator<Item = Result<Vec<u8>, EngineError>> + Send>;

// ------------------------------------------------------------------------------------------------
// Settings
// ------------------------------------------------------------------------------------------------

/// Validated configuration of the object-storage backend.
#[derive(Debug, Clone)]
pub struct ObjectStorageSettings {
    /// Local scratch directory holding memtable logs.
    pub local_dir: PathBuf,

    /// Estimated uncompressed bytes per SSTable index block.
    pub index_block_size: u64,

    /// Lower SSTable size bound for split writes.
    pub min_size: u64,

    /// Upper SSTable size bound for split writes.
    pub max_size: u64,

    /// Estimated compression ratio for block sizing.
    pub compress_factor: f64,

    /// Memtable on-disk size that triggers rotation.
    pub max_memtable_size: u64,

    /// Maximum sealed memtables awaiting push.
    pub flush_queue_depth: usize,
}

impl ObjectStorageSettings {
    /// Builds settings from a raw option map, rejecting unknown names and
    /// invalid values.
    pub fn from_map(options: &HashMap<String, Value>) -> Result<Self, EngineError> {
        for (name, value) in options {
            let validator = SETTINGS_VALIDATORS
                .iter()
                .find(|(known, _)| known == name)
                .map(|(_, validator)| validator)
                .ok_or_else(|| EngineError::BadSettings(format!("unknown option {name:?}")))?;
            if !validator(value) {
                return Err(EngineError::BadSettings(format!(
                    "invalid value for {name:?}: {value}"
                )));
            }
        }

        let str_opt = |name: &str| options.get(name).and_then(Value::as_str);
        let u64_opt = |name: &str| options.get(name).and_then(Value::as_u64);

        let local_dir = str_opt("local_dir")
            .map(PathBuf::from)
            .ok_or_else(|| EngineError::BadSettings("local_dir is required".into()))?;

        let defaults = SstConfig::default();
        let settings = Self {
            local_dir,
            index_block_size: u64_opt("index_block_size").unwrap_or(defaults.index_block_size),
            min_size: u64_opt("min_size").unwrap_or(defaults.min_size),
            max_size: u64_opt("max_size").unwrap_or(defaults.max_size),
            compress_factor: options
                .get("compress_factor")
                .and_then(Value::as_f64)
                .unwrap_or(defaults.compress_factor),
            max_memtable_size: u64_opt("max_memtable_size").unwrap_or(256 * 1024 * 1024),
            flush_queue_depth: u64_opt("flush_queue_depth").unwrap_or(4) as usize,
        };

        if settings.min_size > settings.max_size {
            return Err(EngineError::BadSettings(format!(
                "min_size {} exceeds max_size {}",
                settings.min_size, settings.max_size
            )));
        }
        Ok(settings)
    }

    fn sst_config(&self) -> SstConfig {
        SstConfig {
            index_block_size: self.index_block_size,
            min_size: self.min_size,
            max_size: self.max_size,
            compress_factor: self.compress_factor,
        }
    }
}

/// Per-option validators of the object-storage backend.
///
/// The router consults these to reject unknown or invalid options before
/// a backend is constructed.
pub const SETTINGS_VALIDATORS: &[(&str, fn(&Value) -> bool)] = &[
    ("local_dir", |v| {
        v.as_str().is_some_and(|s| !s.is_empty())
    }),
    ("index_block_size", |v| v.as_u64().is_some_and(|n| n > 0)),
    ("min_size", |v| v.as_u64().is_some_and(|n| n > 0)),
    ("max_size", |v| v.as_u64().is_some_and(|n| n > 0)),
    ("compress_factor", |v| {
        v.as_f64().is_some_and(|f| f > 0.0 && f <= 1.0)
    }),
    ("max_memtable_size", |v| v.as_u64().is_some_and(|n| n > 0)),
    ("flush_queue_depth", |v| v.as_u64().is_some_and(|n| n > 0)),
];

// ------------------------------------------------------------------------------------------------
// EngineCore — state shared with the flusher
// ------------------------------------------------------------------------------------------------

/// State shared between the request path and the flusher thread.
pub(crate) struct EngineCore {
    pub(crate) namespace: String,

    /// Bucket key prefix isolating this namespace (`<namespace>/`).
    pub(crate) key_prefix: String,

    /// Scratch directory holding this namespace's memtable logs.
    scratch_dir: PathBuf,

    pub(crate) bucket: Arc<dyn Bucket>,
    pub(crate) manifest: Manifest,
    pub(crate) sst_config: SstConfig,
    pub(crate) settings: ObjectStorageSettings,

    /// The single writable memtable, created on first write.
    active: RwLock<Option<Arc<MemTable>>>,

    /// Sealed memtables awaiting push, oldest first. Still readable.
    sealed: Mutex<VecDeque<Arc<MemTable>>>,
}

impl EngineCore {
    fn active_snapshot(&self) -> Result<Option<Arc<MemTable>>, EngineError> {
        let guard = self
            .active
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Ok(guard.clone())
    }

    /// Returns the active memtable, creating one on first write.
    fn get_or_create_active(&self) -> Result<Arc<MemTable>, EngineError> {
        {
            let guard = self
                .active
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            if let Some(active) = guard.as_ref() {
                return Ok(Arc::clone(active));
            }
        }

        let mut guard = self
            .active
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        if let Some(active) = guard.as_ref() {
            return Ok(Arc::clone(active));
        }
        let fresh = Arc::new(MemTable::create(&self.scratch_dir)?);
        *guard = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Sealed memtables, newest first (read priority order).
    fn sealed_snapshot(&self) -> Result<Vec<Arc<MemTable>>, EngineError> {
        let guard = self
            .sealed
            .lock()
            .map_err(|_| EngineError::Internal("Mutex poisoned".into()))?;
        Ok(guard.iter().rev().cloned().collect())
    }

    /// Oldest sealed memtable, if any (flusher work order).
    pub(crate) fn oldest_sealed(&self) -> Option<Arc<MemTable>> {
        self.sealed
            .lock()
            .ok()
            .and_then(|guard| guard.front().cloned())
    }

    /// Drops a fully pushed memtable from the readable set.
    pub(crate) fn remove_sealed(&self, store: &Arc<MemTable>) {
        if let Ok(mut guard) = self.sealed.lock() {
            guard.retain(|entry| !Arc::ptr_eq(entry, store));
        }
    }
}

// ------------------------------------------------------------------------------------------------
// StreamEngine
// ------------------------------------------------------------------------------------------------

/// The storage pipeline of one namespace.
pub struct StreamEngine {
    core: Arc<EngineCore>,
    flusher: Mutex<Option<Flusher>>,
}

impl StreamEngine {
    /// Opens the engine for `namespace`: refreshes the manifest, recovers
    /// surviving memtable logs, and starts the flusher.
    pub fn new(
        namespace: &str,
        bucket: Arc<dyn Bucket>,
        settings: ObjectStorageSettings,
    ) -> Result<Self, EngineError> {
        let key_prefix = format!("{namespace}/");
        let scratch_dir = settings.local_dir.join(namespace);
        fs::create_dir_all(&scratch_dir)?;

        let manifest = Manifest::new(Arc::clone(&bucket), key_prefix.clone());
        manifest.refresh()?;

        let core = Arc::new(EngineCore {
            namespace: namespace.to_string(),
            key_prefix,
            scratch_dir,
            bucket,
            manifest,
            sst_config: settings.sst_config(),
            settings,
            active: RwLock::new(None),
            sealed: Mutex::new(VecDeque::new()),
        });

        // Recover memtables that never finished pushing; they must be
        // queued before the fresh active memtable takes writes.
        let recovered = Self::recover(&core)?;
        let flusher = Flusher::spawn(Arc::clone(&core))?;
        if recovered > 0 {
            info!(namespace, recovered, "recovered unflushed memtables");
            flusher.notify();
        }

        Ok(Self {
            core,
            flusher: Mutex::new(Some(flusher)),
        })
    }

    /// Reopens surviving memtable logs into the sealed queue, oldest
    /// first. Returns how many were found.
    fn recover(core: &EngineCore) -> Result<usize, EngineError> {
        let mut logs = Vec::new();
        for entry in fs::read_dir(&core.scratch_dir)? {
            let path = entry?.path();
            if let Some(id) = Wal::<Record>::parse_id_from_path(&path) {
                logs.push((id, path));
            }
        }
        logs.sort();

        let mut guard = core
            .sealed
            .lock()
            .map_err(|_| EngineError::Internal("Mutex poisoned".into()))?;
        for (id, path) in &logs {
            match MemTable::open(path) {
                Ok(store) => guard.push_back(Arc::new(store)),
                Err(e) => {
                    // An unreadable log cannot be replayed; leave it on
                    // disk for manual inspection and keep serving.
                    warn!(id, path = %path.display(), error = %e, "skipping unreadable memtable log");
                }
            }
        }
        Ok(guard.len())
    }

    /// Inserts a batch of event payloads, assigning each a server id.
    ///
    /// Ids within the batch carry non-decreasing timestamps and strictly
    /// increasing order keys. Returns the number accepted.
    pub fn insert(
        &self,
        stream: &str,
        events: Vec<Map<String, Value>>,
    ) -> Result<usize, EngineError> {
        let mut count = 0usize;
        let mut last_id: Option<TimeUuid> = None;

        for mut event in events {
            let time = event
                .get(TIMESTAMP_FIELD)
                .and_then(Value::as_u64)
                .unwrap_or_else(now_ticks);

            let mut id = TimeUuid::from_time(time, EntropyKind::Random);
            while last_id.is_some_and(|last| id <= last) {
                let floor = last_id.map(|last| last.timestamp()).unwrap_or(0);
                id = TimeUuid::from_time(time.max(floor), EntropyKind::Random);
            }
            last_id = Some(id);

            event.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            event.insert(TIMESTAMP_FIELD.to_string(), Value::from(time));
            let record = Record::Event(EventRecord::from_payload(event)?);

            self.insert_record(stream, &record)?;
            count += 1;
        }

        // Rotate once the local buffer outgrows its bound.
        let should_rotate = match self.core.active_snapshot()? {
            Some(active) => active.size()? >= self.core.settings.max_memtable_size,
            None => false,
        };
        if should_rotate {
            self.flush()?;
        }

        debug!(namespace = %self.core.namespace, stream, count, "events inserted");
        Ok(count)
    }

    /// Inserts into the active memtable, retrying once when a concurrent
    /// rotation sealed it mid-flight.
    fn insert_record(&self, stream: &str, record: &Record) -> Result<(), EngineError> {
        let active = self.core.get_or_create_active()?;
        match active.insert(stream, record) {
            Err(MemTableError::Sealed(_)) => {
                let active = self.core.get_or_create_active()?;
                Ok(active.insert(stream, record)?)
            }
            other => Ok(other?),
        }
    }

    /// Seals the active memtable and queues it for push.
    ///
    /// Fails with [`EngineError::FlushQueueFull`] when too many sealed
    /// memtables are already waiting — back-pressure for writers.
    pub fn flush(&self) -> Result<(), EngineError> {
        let taken = {
            let mut sealed = self
                .core
                .sealed
                .lock()
                .map_err(|_| EngineError::Internal("Mutex poisoned".into()))?;
            if sealed.len() >= self.core.settings.flush_queue_depth {
                return Err(EngineError::FlushQueueFull);
            }

            let mut active = self
                .core
                .active
                .write()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            match active.take() {
                Some(store) if store.is_empty()? => {
                    // Nothing buffered; reclaim the log without a push.
                    store.seal();
                    if let Err(e) = store.destroy() {
                        warn!(memtable = store.id(), error = %e, "failed to remove empty memtable log");
                    }
                    None
                }
                Some(store) => {
                    store.seal();
                    sealed.push_back(Arc::clone(&store));
                    Some(store)
                }
                None => None,
            }
        };

        if let Some(store) = taken {
            info!(
                namespace = %self.core.namespace,
                memtable = store.id(),
                bytes = store.size().unwrap_or(0),
                "memtable rotated"
            );
            if let Some(flusher) = self
                .flusher
                .lock()
                .map_err(|_| EngineError::Internal("Mutex poisoned".into()))?
                .as_ref()
            {
                flusher.notify();
            }
        }
        Ok(())
    }

    /// Computes the `[lo, hi]` id window of a retrieve.
    fn retrieve_bounds(options: &RetrieveOptions) -> (TimeUuid, TimeUuid) {
        let kind = match options.order {
            ResultOrder::Ascending => EntropyKind::Lowest,
            ResultOrder::Descending => EntropyKind::Highest,
        };
        let lo = options
            .start_id
            .unwrap_or_else(|| TimeUuid::from_time(options.start_time, kind));
        let hi = options
            .end_id
            .unwrap_or_else(|| TimeUuid::from_time(options.end_time, kind));
        (lo, hi)
    }

    /// Retrieves events of `stream` in the requested order, tombstones
    /// applied, as JSON-serialized payloads.
    pub fn retrieve(
        &self,
        stream: &str,
        options: &RetrieveOptions,
    ) -> Result<EventStream, EngineError> {
        let (lo, hi) = Self::retrieve_bounds(options);
        if lo >= hi {
            return Ok(Box::new(std::iter::empty()));
        }
        let descending = options.order == ResultOrder::Descending;

        // Snapshot every source up front: memtables first (they win merge
        // ties), newest to oldest, then the overlapping tables of the
        // current manifest view.
        let mut memtables = Vec::new();
        if let Some(active) = self.core.active_snapshot()? {
            memtables.push(active);
        }
        memtables.extend(self.core.sealed_snapshot()?);
        let ssts = self.core.manifest.view()?.overlapping_ssts(stream, &lo, &hi);

        // Tombstones can sort outside the merged window (their start id
        // lies below `lo`, or the scan runs newest-first), so the filter
        // is seeded with every tombstone overlapping the window.
        let mut seed: Vec<DeleteRecord> = Vec::new();
        for memtable in &memtables {
            seed.extend(memtable.delete_records(stream, Some(&lo), Some(&hi))?);
        }
        for sst in &ssts {
            if !sst.has_delete {
                continue;
            }
            match sst.delete_records(Some(&lo), Some(&hi)) {
                Ok(tombs) => seed.extend(tombs),
                Err(e) if options.lossy => {
                    warn!(key = %sst.key, error = %e, "lossy retrieve skipping tombstones of unreadable sstable");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut sources: Vec<RecordStream> = Vec::new();
        for memtable in &memtables {
            let mut records: Vec<Record> =
                memtable.stream_iter(stream, Some(lo), Some(hi))?.collect();
            if descending {
                records.reverse();
            }
            sources.push(Box::new(records.into_iter().map(Ok)));
        }
        for sst in &ssts {
            match sst.iterator(Some(lo), Some(hi), descending) {
                Ok(scan) if options.lossy => {
                    // Isolate this table's failures: its stream ends at
                    // the first bad block instead of aborting the merge.
                    let key = sst.key.clone();
                    sources.push(Box::new(scan.map_while(move |item| match item {
                        Ok(record) => Some(Ok(record)),
                        Err(e) => {
                            warn!(key = %key, error = %e, "lossy retrieve truncating unreadable sstable");
                            None
                        }
                    })));
                }
                Ok(scan) => {
                    sources.push(Box::new(scan.map(|item| item.map_err(EngineError::from))));
                }
                Err(e) if options.lossy => {
                    warn!(key = %sst.key, error = %e, "lossy retrieve skipping unreadable sstable");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let merged = MergeIterator::new(sources, descending)?;
        let filtered = TombstoneFilter::new(merged, seed);

        // An explicit start_id is an exclusive cursor; the scan window
        // already excludes everything below it.
        let cursor = options.start_id;
        let events = filtered.filter(move |item| match (item, cursor) {
            (Ok(event), Some(cursor)) => event.id != cursor,
            _ => true,
        });

        let events: Box<dyn Iterator<Item = Result<EventRecord, EngineError>> + Send> =
            match options.limit {
                Some(limit) => Box::new(events.take(limit)),
                None => Box::new(events),
            };

        debug!(
            namespace = %self.core.namespace,
            stream,
            lo = %lo,
            hi = %hi,
            descending,
            "retrieve started"
        );
        Ok(Box::new(
            events.map(|item| item.map(|event| event.payload_bytes().to_vec())),
        ))
    }

    /// Writes a range tombstone covering the requested window.
    ///
    /// Returns the number of locally wiped entries plus any per-record
    /// errors (the count excludes events already flushed — those are
    /// shadowed at read time).
    pub fn delete(
        &self,
        stream: &str,
        options: &DeleteOptions,
    ) -> Result<(usize, Vec<EngineError>), EngineError> {
        let lo = options
            .start_id
            .unwrap_or_else(|| TimeUuid::from_time(options.start_time, EntropyKind::Lowest));
        let hi = options
            .end_id
            .unwrap_or_else(|| TimeUuid::from_time(options.end_time, EntropyKind::Highest));
        if lo >= hi {
            return Ok((0, Vec::new()));
        }

        let active = self.core.get_or_create_active()?;
        let wiped = match active.delete(stream, lo, hi) {
            Err(MemTableError::Sealed(_)) => {
                let active = self.core.get_or_create_active()?;
                active.delete(stream, lo, hi)?
            }
            other => other?,
        };

        info!(namespace = %self.core.namespace, stream, start = %lo, end = %hi, wiped, "range deleted");
        Ok((wiped, Vec::new()))
    }

    /// Names of every stream visible in the bucket or the memtables.
    pub fn streams(&self) -> Result<Vec<String>, EngineError> {
        let mut names = self.core.manifest.streams()?;
        if let Some(active) = self.core.active_snapshot()? {
            names.extend(active.streams()?);
        }
        for sealed in self.core.sealed_snapshot()? {
            names.extend(sealed.streams()?);
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// True when the bucket answers listing calls.
    pub fn is_alive(&self) -> bool {
        self.core
            .bucket
            .list(&format!("{}sstables/", self.core.key_prefix), Some('/'))
            .is_ok()
    }

    /// Re-reads the bucket's table directory.
    pub fn refresh_manifest(&self) -> Result<(), EngineError> {
        Ok(self.core.manifest.refresh()?)
    }

    /// Stops the flusher. Idempotent; sealed memtables stay on disk and
    /// are recovered on the next start.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.flusher.lock() {
            if let Some(flusher) = guard.take() {
                flusher.shutdown();
            }
        }
    }

    /// Sealed memtables currently awaiting push.
    pub fn pending_memtables(&self) -> usize {
        self.core.sealed.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Blocks until every sealed memtable has been pushed, or the timeout
    /// elapses. Returns whether the queue drained.
    pub fn wait_for_flush(&self, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.pending_memtables() > 0 {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        true
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// ------------------------------------------------------------------------------------------------
// Storage façade
// ------------------------------------------------------------------------------------------------

/// The backend seam the router dispatches through.
pub trait Storage: Send + Sync {
    /// True when the backend can serve requests.
    fn is_alive(&self) -> bool;

    /// Appends events to `(namespace, stream)`; returns the number
    /// accepted.
    fn insert(
        &self,
        namespace: &str,
        stream: &str,
        events: Vec<Map<String, Value>>,
    ) -> Result<usize, EngineError>;

    /// Streams events of `(namespace, stream)` within the requested
    /// window.
    fn retrieve(
        &self,
        namespace: &str,
        stream: &str,
        options: &RetrieveOptions,
    ) -> Result<EventStream, EngineError>;

    /// Logically removes events within the requested window.
    fn delete(
        &self,
        namespace: &str,
        stream: &str,
        options: &DeleteOptions,
    ) -> Result<(usize, Vec<EngineError>), EngineError>;

    /// Stream names of `namespace`.
    fn streams(&self, namespace: &str) -> Result<Vec<String>, EngineError>;

    /// Stops background activity. Idempotent.
    fn stop(&self);
}

/// The object-storage backend: one [`StreamEngine`] per served namespace.
pub struct ObjectStorage {
    engines: HashMap<String, StreamEngine>,
}

impl ObjectStorage {
    /// Validates `options` against [`SETTINGS_VALIDATORS`] and opens one
    /// engine per namespace.
    pub fn new(
        bucket: Arc<dyn Bucket>,
        namespaces: &[&str],
        options: &HashMap<String, Value>,
    ) -> Result<Self, EngineError> {
        let settings = ObjectStorageSettings::from_map(options)?;
        let mut engines = HashMap::new();
        for namespace in namespaces {
            let engine = StreamEngine::new(namespace, Arc::clone(&bucket), settings.clone())?;
            engines.insert((*namespace).to_string(), engine);
        }
        Ok(Self { engines })
    }

    fn engine(&self, namespace: &str) -> Result<&StreamEngine, EngineError> {
        self.engines
            .get(namespace)
            .ok_or_else(|| EngineError::UnknownNamespace(namespace.to_string()))
    }

    /// Rotates the active memtable of `namespace`.
    pub fn flush(&self, namespace: &str) -> Result<(), EngineError> {
        self.engine(namespace)?.flush()
    }

    /// Blocks until `namespace`'s sealed memtables are pushed, or the
    /// timeout elapses.
    pub fn wait_for_flush(
        &self,
        namespace: &str,
        timeout: std::time::Duration,
    ) -> Result<bool, EngineError> {
        Ok(self.engine(namespace)?.wait_for_flush(timeout))
    }
}

impl Storage for ObjectStorage {
    fn is_alive(&self) -> bool {
        self.engines.values().all(StreamEngine::is_alive)
    }

    fn insert(
        &self,
        namespace: &str,
        stream: &str,
        events: Vec<Map<String, Value>>,
    ) -> Result<usize, EngineError> {
        self.engine(namespace)?.insert(stream, events)
    }

    fn retrieve(
        &self,
        namespace: &str,
        stream: &str,
        options: &RetrieveOptions,
    ) -> Result<EventStream, EngineError> {
        self.engine(namespace)?.retrieve(stream, options)
    }

    fn delete(
        &self,
        namespace: &str,
        stream: &str,
        options: &DeleteOptions,
    ) -> Result<(usize, Vec<EngineError>), EngineError> {
        self.engine(namespace)?.delete(stream, options)
    }

    fn streams(&self, namespace: &str) -> Result<Vec<String>, EngineError> {
        self.engine(namespace)?.streams()
    }

    fn stop(&self) {
        for engine in self.engines.values() {
            engine.stop();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Router
// ------------------------------------------------------------------------------------------------

/// Routes `(namespace, stream)` pairs to backends.
///
/// Routes are registered per namespace with a stream-name prefix; the
/// longest matching prefix wins, and the empty prefix is the namespace
/// default.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Vec<(String, Arc<dyn Storage>)>>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend for streams of `namespace` whose names start
    /// with `stream_prefix`. Longer prefixes are consulted first.
    pub fn add_route(
        &mut self,
        namespace: &str,
        stream_prefix: &str,
        backend: Arc<dyn Storage>,
    ) {
        let routes = self.routes.entry(namespace.to_string()).or_default();
        routes.push((stream_prefix.to_string(), backend));
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Picks the backend serving `(namespace, stream)`.
    pub fn backend_for(
        &self,
        namespace: &str,
        stream: &str,
    ) -> Result<Arc<dyn Storage>, EngineError> {
        let routes = self
            .routes
            .get(namespace)
            .ok_or_else(|| EngineError::UnknownNamespace(namespace.to_string()))?;
        routes
            .iter()
            .find(|(prefix, _)| stream.starts_with(prefix.as_str()))
            .map(|(_, backend)| Arc::clone(backend))
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "no route for stream {stream:?} in namespace {namespace:?}"
                ))
            })
    }

    /// True when every registered backend is alive.
    pub fn is_alive(&self) -> bool {
        self.routes
            .values()
            .flatten()
            .all(|(_, backend)| backend.is_alive())
    }

    /// Inserts through the routed backend.
    pub fn insert(
        &self,
        namespace: &str,
        stream: &str,
        events: Vec<Map<String, Value>>,
    ) -> Result<usize, EngineError> {
        self.backend_for(namespace, stream)?
            .insert(namespace, stream, events)
    }

    /// Retrieves through the routed backend.
    pub fn retrieve(
        &self,
        namespace: &str,
        stream: &str,
        options: &RetrieveOptions,
    ) -> Result<EventStream, EngineError> {
        self.backend_for(namespace, stream)?
            .retrieve(namespace, stream, options)
    }

    /// Deletes through the routed backend.
    pub fn delete(
        &self,
        namespace: &str,
        stream: &str,
        options: &DeleteOptions,
    ) -> Result<(usize, Vec<EngineError>), EngineError> {
        self.backend_for(namespace, stream)?
            .delete(namespace, stream, options)
    }

    /// Union of stream names served under `namespace`.
    pub fn streams(&self, namespace: &str) -> Result<Vec<String>, EngineError> {
        let routes = self
            .routes
            .get(namespace)
            .ok_or_else(|| EngineError::UnknownNamespace(namespace.to_string()))?;
        let mut names = Vec::new();
        for (_, backend) in routes {
            names.extend(backend.streams(namespace)?);
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Stops every registered backend. Idempotent.
    pub fn stop(&self) {
        for (_, backend) in self.routes.values().flatten() {
            backend.stop();
        }
    }
}
