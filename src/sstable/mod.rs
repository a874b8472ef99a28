//! # Sorted String Table (SSTable) Module
//!
//! An **immutable**, **object-storage-resident** sorted run of records.
//! Every SSTable is a pair of bucket objects sharing a `(stream, start_id)`
//! key:
//!
//! - `sstables/<stream>/sst_<start_id>` — the **payload**: concatenated,
//!   independently decompressible blocks, each a compressed serialized list
//!   of records. No magic number, no in-payload framing.
//! - `sstables/<stream>/idx_<start_id>` — the **index**: one compressed
//!   serialized list of [`IndexRecord`]s in strict ascending `start_id`
//!   order. Entry *i*'s `offset` is the byte offset of block *i*; block *i*
//!   covers `[offset_i, offset_{i+1})` (the last block runs to the payload
//!   size). The index is the payload's sole table of contents.
//!
//! The payload object carries ten JSON-encoded metadata attributes
//! ([`METADATA_KEYS`]); all of them are required for the table to open.
//!
//! ## Why a separate index object
//!
//! Readers can download the full block directory without paying for the
//! payload, then fetch byte-exact sub-ranges covering only the blocks that
//! overlap their query.
//!
//! # Sub-modules
//!
//! - [`builder`] — [`create_sstable`](builder::create_sstable) consumes a
//!   sorted record stream and uploads one size-bounded table.
//! - [`iterator`] — [`SsTableScanIterator`] for spool-backed forward and
//!   reverse range scans.
//!
//! # Concurrency model
//!
//! - SSTables are immutable; handles are freely shared between readers.
//! - The index is fetched lazily on first use behind a read-write lock, so
//!   concurrent first accesses race safely and later accesses reuse the
//!   cached copy for the lifetime of the handle.
//!
//! # Guarantees
//!
//! - **Metadata-only open:** constructing a handle costs one metadata
//!   probe; a missing object fails with [`SSTableError::Missing`], missing
//!   or undecodable attributes with [`SSTableError::Malformed`].
//! - **Byte-exact range reads:** a scan downloads exactly
//!   `data_offsets(lo, hi).1 − data_offsets(lo, hi).0` bytes; any shortfall
//!   is a fatal [`SSTableError::Malformed`].

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Re-exports — public API surface
// ------------------------------------------------------------------------------------------------

pub use builder::{PushbackIter, SstConfig, SstHandle, SstOptions, create_sstable};
pub use iterator::SsTableScanIterator;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    io,
    sync::{Arc, RwLock},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::bucket::{Bucket, BucketError};
use crate::record::{DeleteRecord, IndexRecord, Record, RecordError};
use crate::timeuuid::TimeUuid;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Metadata attributes every SSTable payload object must carry.
pub const METADATA_KEYS: [&str; 10] = [
    "start_id",
    "end_id",
    "has_delete",
    "ancestors",
    "siblings",
    "size",
    "version",
    "level",
    "memtable_id",
    "num_records",
];

/// Current SSTable format version stamped into new tables.
pub const SST_VERSION: u64 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations (open, scan, build).
#[derive(Debug, Error)]
pub enum SSTableError {
    /// The payload or index object is absent from the bucket.
    #[error("sstable missing: {0}")]
    Missing(String),

    /// The table cannot be decoded: bad metadata, corrupt index, short
    /// range read.
    #[error("sstable malformed: {0}")]
    Malformed(String),

    /// A write targeted a payload key that already exists.
    #[error("sstable already exists: {0}")]
    AlreadyExists(String),

    /// Underlying bucket failure.
    #[error("bucket error: {0}")]
    Bucket(#[from] BucketError),

    /// Record marshalling failure inside a block.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Local spool or staging file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The writer was handed an empty record stream.
    #[error("cannot build an SSTable from an empty record stream")]
    EmptyInput,

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Key scheme
// ------------------------------------------------------------------------------------------------

/// Payload object key for `(stream, start_id)`.
pub fn sst_key(prefix: &str, stream: &str, start_id: &TimeUuid) -> String {
    format!("{prefix}sstables/{stream}/sst_{}", start_id.to_lex())
}

/// Index object key for `(stream, start_id)`.
pub fn idx_key(prefix: &str, stream: &str, start_id: &TimeUuid) -> String {
    format!("{prefix}sstables/{stream}/idx_{}", start_id.to_lex())
}

/// Derives the index key from a payload key.
fn idx_key_for(sst_key: &str) -> Result<String, SSTableError> {
    match sst_key.rfind("sst_") {
        Some(pos) => Ok(format!("{}idx_{}", &sst_key[..pos], &sst_key[pos + 4..])),
        None => Err(SSTableError::Malformed(format!(
            "payload key has no sst_ component: {sst_key}"
        ))),
    }
}

/// Extracts the stream name from a payload key
/// (`…/sstables/<stream>/sst_<id>`).
fn stream_from_key(sst_key: &str) -> Result<String, SSTableError> {
    let mut parts = sst_key.rsplit('/');
    let _object = parts.next();
    match parts.next() {
        Some(stream) if !stream.is_empty() => Ok(stream.to_string()),
        _ => Err(SSTableError::Malformed(format!(
            "payload key has no stream component: {sst_key}"
        ))),
    }
}

// ------------------------------------------------------------------------------------------------
// SsTableIndex
// ------------------------------------------------------------------------------------------------

/// The decoded block directory of one SSTable.
pub struct SsTableIndex {
    /// Index records in strict ascending `start_id` order.
    records: Vec<IndexRecord>,

    /// Total payload size in bytes; closes the last block's byte range.
    sst_size: u64,
}

impl SsTableIndex {
    /// Fetches and decodes the index object.
    fn load(bucket: &dyn Bucket, index_key: &str, sst_size: u64) -> Result<Self, SSTableError> {
        let meta = bucket.get_metadata(index_key).map_err(|e| match e {
            BucketError::NotFound(key) => SSTableError::Missing(key),
            other => SSTableError::Bucket(other),
        })?;

        let mut compressed = Vec::with_capacity(meta.size as usize);
        bucket.get_range(index_key, 0, meta.size, &mut compressed)?;

        let raw = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| SSTableError::Malformed(format!("index decompression failed: {e}")))?;
        let generic: Vec<Record> = bincode::deserialize(&raw)
            .map_err(|e| SSTableError::Malformed(format!("index decode failed: {e}")))?;

        let mut records = Vec::with_capacity(generic.len());
        for record in generic {
            match record {
                Record::Index(entry) => records.push(entry),
                other => {
                    return Err(SSTableError::Malformed(format!(
                        "non-index record in index object: tag {}",
                        other.type_tag()
                    )));
                }
            }
        }

        let index = Self { records, sst_size };
        if !index.is_consistent() {
            return Err(SSTableError::Malformed(
                "index records out of order".to_string(),
            ));
        }

        trace!(index_key, blocks = index.records.len(), "sstable index loaded");
        Ok(index)
    }

    /// Returns the index records.
    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    /// True when the directory is sorted strictly ascending by `start_id`.
    pub fn is_consistent(&self) -> bool {
        self.records
            .windows(2)
            .all(|pair| pair[0].start_id < pair[1].start_id)
    }

    /// Indices of the blocks that may contain ids in `[lo, hi]`.
    ///
    /// The lower edge is right-biased: the last block whose `start_id ≤ lo`
    /// may still hold records at or past `lo`.
    fn covered_blocks(&self, lo: Option<&TimeUuid>, hi: Option<&TimeUuid>) -> (usize, usize) {
        let first = match lo {
            Some(lo) => {
                let i = self.records.partition_point(|r| r.start_id <= *lo);
                i.saturating_sub(1)
            }
            None => 0,
        };
        let last = match hi {
            Some(hi) => self.records.partition_point(|r| r.start_id <= *hi),
            None => self.records.len(),
        };
        (first, last.max(first))
    }

    /// Minimum byte range covering all blocks that may contain ids in
    /// `[lo, hi]`, as half-open `(start_byte, end_byte)`.
    pub fn data_offsets(&self, lo: Option<&TimeUuid>, hi: Option<&TimeUuid>) -> (u64, u64) {
        if self.records.is_empty() {
            return (0, 0);
        }
        let (first, last) = self.covered_blocks(lo, hi);
        let start = self.records[first].offset;
        let end = match self.records.get(last) {
            Some(next) => next.offset,
            None => self.sst_size,
        };
        (start, end)
    }

    /// Per-block byte ranges covering `[lo, hi]`, ascending or descending.
    pub fn block_offsets(
        &self,
        lo: Option<&TimeUuid>,
        hi: Option<&TimeUuid>,
        reverse: bool,
    ) -> Vec<(u64, u64)> {
        if self.records.is_empty() {
            return Vec::new();
        }
        let (first, last) = self.covered_blocks(lo, hi);
        let mut out = Vec::with_capacity(last - first);
        for i in first..last {
            let start = self.records[i].offset;
            let end = match self.records.get(i + 1) {
                Some(next) => next.offset,
                None => self.sst_size,
            };
            out.push((start, end));
        }
        if reverse {
            out.reverse();
        }
        out
    }

    /// True when any covered block carries the `has_delete` flag.
    pub fn has_delete(&self, lo: Option<&TimeUuid>, hi: Option<&TimeUuid>) -> bool {
        if self.records.is_empty() {
            return false;
        }
        let (first, last) = self.covered_blocks(lo, hi);
        self.records[first..last].iter().any(|r| r.has_delete)
    }
}

// ------------------------------------------------------------------------------------------------
// SsTable — immutable remote reader
// ------------------------------------------------------------------------------------------------

/// Handle to one immutable SSTable in the bucket.
///
/// Opening only probes the payload object's metadata; the index object is
/// fetched lazily on the first range computation.
pub struct SsTable {
    bucket: Arc<dyn Bucket>,

    /// Payload object key.
    pub key: String,

    /// Index object key.
    pub index_key: String,

    /// Stream this table belongs to.
    pub stream: String,

    /// Id of the first record.
    pub start_id: TimeUuid,

    /// Greatest id (or tombstone end) contained.
    pub end_id: TimeUuid,

    /// True when the table carries at least one tombstone.
    pub has_delete: bool,

    /// Payload size in bytes.
    pub size: u64,

    /// Number of records in the payload.
    pub num_records: u64,

    /// Format version the table was written with.
    pub version: u64,

    /// Compaction level (0 for freshly flushed tables).
    pub level: u64,

    /// Id of the memtable this table was flushed from, when applicable.
    pub memtable_id: Option<u64>,

    /// Payload keys of the tables a compaction merged into this one.
    pub ancestors: Vec<String>,

    /// Payload keys of the peer tables produced by the same compaction.
    pub siblings: Vec<String>,

    /// Lazily loaded block directory.
    index: RwLock<Option<Arc<SsTableIndex>>>,
}

/// Pulls one required attribute out of the metadata map, JSON-decoded.
fn required_attr<T: serde::de::DeserializeOwned>(
    attrs: &crate::bucket::Attrs,
    key_name: &str,
    object_key: &str,
) -> Result<T, SSTableError> {
    let raw = attrs.get(key_name).ok_or_else(|| {
        SSTableError::Malformed(format!("{object_key}: missing metadata attribute {key_name}"))
    })?;
    serde_json::from_str(raw).map_err(|e| {
        SSTableError::Malformed(format!(
            "{object_key}: undecodable metadata attribute {key_name}: {e}"
        ))
    })
}

impl SsTable {
    /// Opens a handle from the payload object's metadata.
    pub fn open(bucket: Arc<dyn Bucket>, key: &str) -> Result<Self, SSTableError> {
        let meta = bucket.get_metadata(key).map_err(|e| match e {
            BucketError::NotFound(k) => SSTableError::Missing(k),
            other => SSTableError::Bucket(other),
        })?;

        let start_id: String = required_attr(&meta.attrs, "start_id", key)?;
        let start_id = TimeUuid::parse(&start_id)
            .map_err(|e| SSTableError::Malformed(format!("{key}: bad start_id: {e}")))?;
        let end_id: String = required_attr(&meta.attrs, "end_id", key)?;
        let end_id = TimeUuid::parse(&end_id)
            .map_err(|e| SSTableError::Malformed(format!("{key}: bad end_id: {e}")))?;

        let table = Self {
            stream: stream_from_key(key)?,
            index_key: idx_key_for(key)?,
            start_id,
            end_id,
            has_delete: required_attr(&meta.attrs, "has_delete", key)?,
            size: required_attr(&meta.attrs, "size", key)?,
            num_records: required_attr(&meta.attrs, "num_records", key)?,
            version: required_attr(&meta.attrs, "version", key)?,
            level: required_attr(&meta.attrs, "level", key)?,
            memtable_id: required_attr(&meta.attrs, "memtable_id", key)?,
            ancestors: required_attr(&meta.attrs, "ancestors", key)?,
            siblings: required_attr(&meta.attrs, "siblings", key)?,
            key: key.to_string(),
            bucket,
            index: RwLock::new(None),
        };

        debug!(
            key = %table.key,
            start = %table.start_id,
            end = %table.end_id,
            records = table.num_records,
            "sstable opened"
        );
        Ok(table)
    }

    /// The table's id interval `(start_id, end_id)`.
    pub fn interval(&self) -> (TimeUuid, TimeUuid) {
        (self.start_id, self.end_id)
    }

    /// Returns the block directory, fetching it on first use.
    ///
    /// Concurrent first calls may both fetch; one result wins and later
    /// calls share it.
    pub fn index(&self) -> Result<Arc<SsTableIndex>, SSTableError> {
        {
            let guard = self
                .index
                .read()
                .map_err(|_| SSTableError::Internal("RwLock poisoned".into()))?;
            if let Some(index) = guard.as_ref() {
                return Ok(Arc::clone(index));
            }
        }

        let loaded = Arc::new(SsTableIndex::load(
            self.bucket.as_ref(),
            &self.index_key,
            self.size,
        )?);

        let mut guard = self
            .index
            .write()
            .map_err(|_| SSTableError::Internal("RwLock poisoned".into()))?;
        let index = guard.get_or_insert_with(|| loaded);
        Ok(Arc::clone(index))
    }

    /// Range scan over `[lo, hi]` (inclusive id bounds, open ends when
    /// `None`), ascending or descending.
    pub fn iterator(
        &self,
        lo: Option<TimeUuid>,
        hi: Option<TimeUuid>,
        reverse: bool,
    ) -> Result<SsTableScanIterator, SSTableError> {
        SsTableScanIterator::new(self, lo, hi, reverse)
    }

    /// Collects the tombstones overlapping `[lo, hi]`.
    ///
    /// A tombstone sorts at its `start_id`, which may lie well below `lo`
    /// while its range still covers the query — so the walk starts at the
    /// first block and runs to the range's upper bound, fetching only the
    /// blocks whose index entries carry the `has_delete` flag. The
    /// writer's flag propagation keeps every block between a tombstone's
    /// carrier and the end of its coverage flagged, so no covering
    /// tombstone can hide in an unflagged block.
    pub fn delete_records(
        &self,
        lo: Option<&TimeUuid>,
        hi: Option<&TimeUuid>,
    ) -> Result<Vec<DeleteRecord>, SSTableError> {
        let index = self.index()?;
        let (_, last) = index.covered_blocks(lo, hi);

        let mut out = Vec::new();
        for i in 0..last {
            if !index.records[i].has_delete {
                continue;
            }
            let start = index.records[i].offset;
            let end = match index.records.get(i + 1) {
                Some(next) => next.offset,
                None => index.sst_size,
            };

            let mut compressed = Vec::with_capacity((end - start) as usize);
            self.bucket.get_range(&self.key, start, end, &mut compressed)?;
            for record in decode_block(&compressed)? {
                if let Record::Delete(tomb) = record {
                    let after_hi = hi.is_some_and(|hi| tomb.start_id > *hi);
                    let before_lo = lo.is_some_and(|lo| tomb.end_id < *lo);
                    if !after_hi && !before_lo {
                        out.push(tomb);
                    }
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn bucket(&self) -> &dyn Bucket {
        self.bucket.as_ref()
    }
}

// ------------------------------------------------------------------------------------------------
// Block codec
// ------------------------------------------------------------------------------------------------

/// Serializes and compresses one block's records.
pub(crate) fn encode_block(records: &[Record]) -> Result<Vec<u8>, SSTableError> {
    let raw = bincode::serialize(records)
        .map_err(|e| SSTableError::Internal(format!("block encode failed: {e}")))?;
    Ok(lz4_flex::compress_prepend_size(&raw))
}

/// Decompresses and deserializes one block.
pub(crate) fn decode_block(compressed: &[u8]) -> Result<Vec<Record>, SSTableError> {
    let raw = lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| SSTableError::Malformed(format!("block decompression failed: {e}")))?;
    bincode::deserialize(&raw)
        .map_err(|e| SSTableError::Malformed(format!("block decode failed: {e}")))
}
