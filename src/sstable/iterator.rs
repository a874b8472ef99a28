//! SSTable scan iterator — spool-backed forward and reverse range reads.
//!
//! Construction computes the minimal byte range covering the queried id
//! interval, issues **one** bulk range fetch into a local spool file, and
//! verifies that the byte count matches exactly. Iteration then decodes
//! one block at a time by seeking inside the spool, so at most one block's
//! records are resident at once.
//!
//! The spool is an anonymous temp file released when the iterator drops,
//! which also covers cooperative cancellation — abandoning the iterator
//! abandons the spool.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tempfile::tempfile;
use tracing::trace;

use crate::record::Record;
use crate::timeuuid::TimeUuid;

use super::{SSTableError, SsTable, decode_block};

// ------------------------------------------------------------------------------------------------
// SsTableScanIterator
// ------------------------------------------------------------------------------------------------

/// Streaming scan over one SSTable's records with `id ∈ [lo, hi]`.
///
/// Yields records in ascending time order, or descending when `reverse`.
/// Errors surface in-stream; the first error ends the scan.
pub struct SsTableScanIterator {
    /// Spooled payload bytes covering the queried range.
    spool: File,

    /// Byte offset of the spool's first byte within the payload object.
    spool_base: u64,

    /// Per-block byte ranges, in iteration order.
    blocks: Vec<(u64, u64)>,

    /// Next block to decode.
    next_block: usize,

    /// Records of the block currently being drained.
    current: std::vec::IntoIter<Record>,

    lo: Option<TimeUuid>,
    hi: Option<TimeUuid>,
    reverse: bool,
    done: bool,
}

impl SsTableScanIterator {
    /// Bulk-fetches the covering byte range and prepares block decoding.
    pub(crate) fn new(
        table: &SsTable,
        lo: Option<TimeUuid>,
        hi: Option<TimeUuid>,
        reverse: bool,
    ) -> Result<Self, SSTableError> {
        let index = table.index()?;
        let (start_byte, end_byte) = index.data_offsets(lo.as_ref(), hi.as_ref());
        let blocks = index.block_offsets(lo.as_ref(), hi.as_ref(), reverse);

        let mut spool = tempfile()?;
        let downloaded = if end_byte > start_byte {
            table
                .bucket()
                .get_range(&table.key, start_byte, end_byte, &mut spool)?
        } else {
            0
        };

        // The bucket must hand back exactly the range the index promised;
        // anything else means the pair of objects is inconsistent.
        if downloaded != end_byte - start_byte {
            return Err(SSTableError::Malformed(format!(
                "{}: short range read, wanted {} bytes, got {downloaded}",
                table.key,
                end_byte - start_byte
            )));
        }

        trace!(
            key = %table.key,
            start_byte,
            end_byte,
            blocks = blocks.len(),
            reverse,
            "sstable scan started"
        );

        Ok(Self {
            spool,
            spool_base: start_byte,
            blocks,
            next_block: 0,
            current: Vec::new().into_iter(),
            lo,
            hi,
            reverse,
            done: false,
        })
    }

    /// Decodes the next block out of the spool into `current`.
    fn load_next_block(&mut self) -> Result<bool, SSTableError> {
        let Some(&(start, end)) = self.blocks.get(self.next_block) else {
            return Ok(false);
        };
        self.next_block += 1;

        self.spool.seek(SeekFrom::Start(start - self.spool_base))?;
        let mut compressed = vec![0u8; (end - start) as usize];
        self.spool.read_exact(&mut compressed)?;

        let mut records = decode_block(&compressed)?;
        if self.reverse {
            records.reverse();
        }
        self.current = records.into_iter();
        Ok(true)
    }
}

impl Iterator for SsTableScanIterator {
    type Item = Result<Record, SSTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let Some(record) = self.current.next() else {
                match self.load_next_block() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.done = true;
                        return None;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            };

            let id = record.id();
            if self.reverse {
                // Records above the range are skipped, below it terminate.
                if self.hi.is_some_and(|hi| id > hi) {
                    continue;
                }
                if self.lo.is_some_and(|lo| id < lo) {
                    self.done = true;
                    return None;
                }
            } else {
                if self.lo.is_some_and(|lo| id < lo) {
                    continue;
                }
                if self.hi.is_some_and(|hi| id > hi) {
                    self.done = true;
                    return None;
                }
            }
            return Some(Ok(record));
        }
    }
}
