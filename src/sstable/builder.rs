//! SSTable writer — uploads one size-bounded table from a sorted record
//! stream.
//!
//! [`create_sstable`] consumes records from a pushback-capable iterator and
//! stages compressed blocks into a local temp file, then uploads the index
//! object followed by the payload object. When the `split` option is set
//! and the staged payload reaches `min_size`, the current record is pushed
//! back onto the input and the call returns early — the caller loops until
//! the stream runs dry, producing a chain of `[min_size, max_size]` tables.
//!
//! # Input Requirements
//!
//! - Records **must** arrive sorted by `(id, type tag)` — the order every
//!   memtable iterator and SSTable scan already produces.
//!
//! # Block sizing
//!
//! Compressed block sizes are **estimated** as
//! `record.size() × compress_factor` instead of compressing mid-stream, so
//! the writer picks block boundaries in one pass and the index stays
//! bounded independently of payload entropy.
//!
//! # Tombstone propagation
//!
//! A block's `has_delete` flag is set when the block contains a tombstone
//! **or** when any of its records is covered by a tombstone seen earlier in
//! the stream (`max_delete` tracking). A reader that range-fetches a single
//! block can therefore always tell whether tombstones are in play without
//! scanning the whole table.
//!
//! # Atomicity & idempotence
//!
//! The index object is uploaded before the payload: a payload object is
//! only ever visible with its index present. The payload upload refuses to
//! overwrite an existing key ([`SSTableError::AlreadyExists`]), which makes
//! flush retries idempotent — the driver skips tables that already made it.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io::{Seek, SeekFrom, Write};

use tempfile::tempfile;
use tracing::{debug, info, trace};

use crate::bucket::{Attrs, Bucket, BucketError};
use crate::record::{IndexRecord, Record};
use crate::timeuuid::TimeUuid;

use super::{SST_VERSION, SSTableError, encode_block, idx_key, sst_key};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Size thresholds steering block and table construction.
#[derive(Debug, Clone)]
pub struct SstConfig {
    /// Estimated uncompressed bytes per index block.
    pub index_block_size: u64,

    /// Staged payload bytes at which a `split` write stops consuming.
    pub min_size: u64,

    /// Upper bound a split table must stay under.
    pub max_size: u64,

    /// Estimated compression ratio applied to record sizes.
    pub compress_factor: f64,
}

impl Default for SstConfig {
    fn default() -> Self {
        Self {
            index_block_size: 2 * 1024 * 1024,
            min_size: 1024 * 1024 * 1024,
            max_size: 2 * 1024 * 1024 * 1024,
            compress_factor: 0.6,
        }
    }
}

/// Per-table options supplied by the flush or compaction driver.
#[derive(Debug, Clone, Default)]
pub struct SstOptions {
    /// Payload keys of the tables compacted into this one.
    pub ancestors: Vec<String>,

    /// Payload keys of peer tables produced by the same compaction.
    pub siblings: Vec<String>,

    /// Id of the memtable this table is flushed from.
    pub memtable_id: Option<u64>,

    /// Compaction level.
    pub level: u64,

    /// When set, stop at `min_size` and leave the rest on the iterator.
    pub split: bool,
}

// ------------------------------------------------------------------------------------------------
// PushbackIter
// ------------------------------------------------------------------------------------------------

/// An iterator adapter that can take one record back.
///
/// The writer uses it to return the record that crossed the split
/// boundary; the flush driver keeps feeding the same instance until empty.
pub struct PushbackIter<I: Iterator<Item = Record>> {
    inner: I,
    pending: Option<Record>,
}

impl<I: Iterator<Item = Record>> PushbackIter<I> {
    /// Wraps a sorted record iterator.
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            pending: None,
        }
    }

    /// Returns `record` to the front of the stream.
    pub fn push_back(&mut self, record: Record) {
        debug_assert!(self.pending.is_none(), "only one record may be pushed back");
        self.pending = Some(record);
    }

    /// True when the stream has at least one more record.
    pub fn peek_some(&mut self) -> bool {
        if self.pending.is_some() {
            return true;
        }
        match self.inner.next() {
            Some(record) => {
                self.pending = Some(record);
                true
            }
            None => false,
        }
    }
}

impl<I: Iterator<Item = Record>> Iterator for PushbackIter<I> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.pending.take().or_else(|| self.inner.next())
    }
}

// ------------------------------------------------------------------------------------------------
// Build state
// ------------------------------------------------------------------------------------------------

/// The block currently being accumulated.
struct BlockState {
    records: Vec<Record>,
    start_id: Option<TimeUuid>,
    has_delete: bool,
    /// Estimated compressed size.
    size: u64,
}

impl BlockState {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            start_id: None,
            has_delete: false,
            size: 0,
        }
    }
}

/// Whole-table running totals.
struct TableState {
    index_records: Vec<Record>,
    /// Actual bytes staged so far.
    size: u64,
    start_id: Option<TimeUuid>,
    end_id: Option<TimeUuid>,
    has_delete: bool,
    num_records: u64,
}

impl TableState {
    fn new() -> Self {
        Self {
            index_records: Vec::new(),
            size: 0,
            start_id: None,
            end_id: None,
            has_delete: false,
            num_records: 0,
        }
    }

    /// Compresses the pending block into the staging file and records its
    /// directory entry.
    fn flush_block(
        &mut self,
        block: &mut BlockState,
        staging: &mut std::fs::File,
    ) -> Result<(), SSTableError> {
        if block.records.is_empty() {
            return Ok(());
        }
        let start_id = block
            .start_id
            .ok_or_else(|| SSTableError::Internal("block without start id".into()))?;

        let compressed = encode_block(&block.records)?;
        staging.write_all(&compressed)?;

        trace!(
            start = %start_id,
            records = block.records.len(),
            estimated = block.size,
            actual = compressed.len(),
            "block flushed"
        );

        self.index_records.push(Record::Index(IndexRecord::new(
            start_id,
            self.size,
            block.has_delete,
        )));
        self.size += compressed.len() as u64;
        self.has_delete |= block.has_delete;

        *block = BlockState::new();
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// create_sstable
// ------------------------------------------------------------------------------------------------

/// Handle describing a freshly uploaded SSTable.
#[derive(Debug, Clone)]
pub struct SstHandle {
    /// Payload object key.
    pub key: String,

    /// Index object key.
    pub index_key: String,

    /// Id of the first record.
    pub start_id: TimeUuid,

    /// Greatest contained id (or tombstone end).
    pub end_id: TimeUuid,

    /// Payload size in bytes.
    pub size: u64,

    /// Records written into the payload.
    pub num_records: u64,

    /// True when the table carries a tombstone.
    pub has_delete: bool,
}

/// Builds and uploads one SSTable for `stream` from a sorted record
/// stream.
///
/// Consumes the entire stream unless `opts.split` is set, in which case
/// consumption stops once the staged payload reaches
/// `config.min_size` — the boundary record is pushed back and the
/// remainder stays on `records` for the caller's next call.
///
/// # Errors
///
/// - [`SSTableError::EmptyInput`] when the stream yields nothing.
/// - [`SSTableError::AlreadyExists`] when the payload key is taken.
pub fn create_sstable<I: Iterator<Item = Record>>(
    bucket: &dyn Bucket,
    key_prefix: &str,
    stream: &str,
    records: &mut PushbackIter<I>,
    config: &SstConfig,
    opts: &SstOptions,
) -> Result<SstHandle, SSTableError> {
    let mut staging = tempfile()?;
    let mut block = BlockState::new();
    let mut table = TableState::new();

    // Tombstone propagation: greatest delete end seen that may still cover
    // upcoming records.
    let mut max_delete = TimeUuid::MIN;

    while let Some(record) = records.next() {
        // Estimated-full block goes out before the record is placed.
        if block.size >= config.index_block_size {
            table.flush_block(&mut block, &mut staging)?;
        }

        // Split boundary: leave this record for the next table.
        if opts.split && table.size >= config.min_size {
            records.push_back(record);
            break;
        }

        if block.start_id.is_none() {
            block.start_id = Some(record.id());
        }
        if table.start_id.is_none() {
            table.start_id = Some(record.id());
        }

        block.size += (record.size() as f64 * config.compress_factor) as u64;
        table.num_records += 1;
        table.end_id = Some(match table.end_id {
            Some(end) => end.max(record.max_id()),
            None => record.max_id(),
        });

        match &record {
            Record::Delete(tomb) => {
                block.has_delete = true;
                max_delete = max_delete.max(tomb.end_id);
            }
            _ if record.id() > max_delete => {
                // Past every tombstone seen so far.
                max_delete = TimeUuid::MIN;
            }
            _ => {
                block.has_delete = true;
            }
        }

        block.records.push(record);
    }

    // Trailing partial block.
    table.flush_block(&mut block, &mut staging)?;

    let (Some(start_id), Some(end_id)) = (table.start_id, table.end_id) else {
        return Err(SSTableError::EmptyInput);
    };

    let payload_key = sst_key(key_prefix, stream, &start_id);
    let index_key = idx_key(key_prefix, stream, &start_id);

    if bucket.exists(&payload_key)? {
        return Err(SSTableError::AlreadyExists(payload_key));
    }

    // Index object first: a payload is only ever visible with its index.
    let index_bytes = encode_block(&table.index_records)?;
    match bucket.put(&index_key, &mut &index_bytes[..], &Attrs::new()) {
        Ok(()) | Err(BucketError::AlreadyExists(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let attrs = metadata_attrs(&table, &start_id, &end_id, opts);
    staging.seek(SeekFrom::Start(0))?;
    match bucket.put(&payload_key, &mut staging, &attrs) {
        Ok(()) => {}
        Err(BucketError::AlreadyExists(key)) => return Err(SSTableError::AlreadyExists(key)),
        Err(e) => return Err(e.into()),
    }

    info!(
        key = %payload_key,
        records = table.num_records,
        bytes = table.size,
        blocks = table.index_records.len(),
        has_delete = table.has_delete,
        "sstable uploaded"
    );

    Ok(SstHandle {
        key: payload_key,
        index_key,
        start_id,
        end_id,
        size: table.size,
        num_records: table.num_records,
        has_delete: table.has_delete,
    })
}

/// Builds the ten required metadata attributes, JSON-encoded.
fn metadata_attrs(
    table: &TableState,
    start_id: &TimeUuid,
    end_id: &TimeUuid,
    opts: &SstOptions,
) -> Attrs {
    let mut attrs = Attrs::new();
    let mut put = |name: &str, value: serde_json::Value| {
        attrs.insert(name.to_string(), value.to_string());
    };
    put("start_id", serde_json::Value::String(start_id.to_string()));
    put("end_id", serde_json::Value::String(end_id.to_string()));
    put("has_delete", serde_json::Value::Bool(table.has_delete));
    put(
        "ancestors",
        serde_json::Value::from(opts.ancestors.clone()),
    );
    put("siblings", serde_json::Value::from(opts.siblings.clone()));
    put("size", serde_json::Value::from(table.size));
    put("version", serde_json::Value::from(SST_VERSION));
    put("level", serde_json::Value::from(opts.level));
    put(
        "memtable_id",
        match opts.memtable_id {
            Some(id) => serde_json::Value::from(id),
            None => serde_json::Value::Null,
        },
    );
    put("num_records", serde_json::Value::from(table.num_records));

    debug!(start = %start_id, end = %end_id, "sstable metadata prepared");
    attrs
}
