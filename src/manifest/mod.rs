//! # Manifest Module
//!
//! The in-memory directory of every SSTable the bucket holds. A refresh
//! enumerates `sstables/<stream>/sst_*` keys with a delimiter listing,
//! opens a handle per table, and installs two derived structures:
//!
//! - `tables`: per-stream map from `(start_id, end_id)` interval to the
//!   owning [`SsTable`] handle,
//! - `itrees`: per-stream **interval tree** (balanced, augmented with the
//!   subtree maximum end id) answering `overlap((lo, hi))` stabbing
//!   queries in `O(log n + k)`.
//!
//! The interval tree stores only intervals; hits are re-looked-up in the
//! owning map, so no cyclic handle references exist.
//!
//! ## Consistency model
//!
//! Refresh is **coarse**: it runs at engine startup, after every flush,
//! and on demand. Between refreshes the view is eventually consistent
//! with the bucket. The whole view is replaced wholesale under a write
//! lock; readers grab an `Arc` snapshot and keep it for the duration of
//! their scan, so a refresh never mutates a view a scan is using.
//!
//! ## Failure policy
//!
//! A table that fails to open (missing index sibling, missing metadata,
//! undecodable attributes) is logged and skipped — a half-uploaded flush
//! must not take down readers of the healthy tables.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bucket::{Bucket, BucketError};
use crate::sstable::SsTable;
use crate::timeuuid::TimeUuid;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Bucket listing or probe failure.
    #[error("bucket error: {0}")]
    Bucket(#[from] BucketError),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Interval tree
// ------------------------------------------------------------------------------------------------

/// One node of the static interval tree.
#[derive(Debug)]
struct IntervalNode {
    start: TimeUuid,
    end: TimeUuid,
    /// Greatest interval end in this node's subtree.
    max_end: TimeUuid,
    left: Option<usize>,
    right: Option<usize>,
}

/// A balanced interval tree over `(start_id, end_id)` intervals,
/// augmented with subtree-max-endpoint for `O(log n + k)` overlap
/// queries.
///
/// Built once per refresh from the full interval set; SSTables are
/// immutable, so no incremental updates are needed.
#[derive(Debug, Default)]
pub struct IntervalTree {
    nodes: Vec<IntervalNode>,
    root: Option<usize>,
}

impl IntervalTree {
    /// Builds a balanced tree from the given intervals.
    pub fn build(mut intervals: Vec<(TimeUuid, TimeUuid)>) -> Self {
        intervals.sort();
        let mut tree = Self {
            nodes: Vec::with_capacity(intervals.len()),
            root: None,
        };
        tree.root = tree.build_range(&intervals);
        tree
    }

    /// Recursively materializes the middle element as the subtree root.
    fn build_range(&mut self, sorted: &[(TimeUuid, TimeUuid)]) -> Option<usize> {
        if sorted.is_empty() {
            return None;
        }
        let mid = sorted.len() / 2;
        let (start, end) = sorted[mid];

        let left = self.build_range(&sorted[..mid]);
        let right = self.build_range(&sorted[mid + 1..]);

        let mut max_end = end;
        if let Some(l) = left {
            max_end = max_end.max(self.nodes[l].max_end);
        }
        if let Some(r) = right {
            max_end = max_end.max(self.nodes[r].max_end);
        }

        self.nodes.push(IntervalNode {
            start,
            end,
            max_end,
            left,
            right,
        });
        Some(self.nodes.len() - 1)
    }

    /// Number of stored intervals.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree holds no intervals.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns every stored interval intersecting `[lo, hi]`.
    pub fn overlap(&self, lo: &TimeUuid, hi: &TimeUuid) -> Vec<(TimeUuid, TimeUuid)> {
        let mut hits = Vec::new();
        self.overlap_walk(self.root, lo, hi, &mut hits);
        hits
    }

    fn overlap_walk(
        &self,
        node: Option<usize>,
        lo: &TimeUuid,
        hi: &TimeUuid,
        hits: &mut Vec<(TimeUuid, TimeUuid)>,
    ) {
        let Some(idx) = node else { return };
        let node = &self.nodes[idx];

        // Nothing in this subtree ends at or past the query start.
        if node.max_end < *lo {
            return;
        }

        self.overlap_walk(node.left, lo, hi, hits);

        if node.start <= *hi && node.end >= *lo {
            hits.push((node.start, node.end));
        }

        // Right subtree starts at or after node.start; only worth visiting
        // while starts can still fall inside the query.
        if node.start <= *hi {
            self.overlap_walk(node.right, lo, hi, hits);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// ManifestView
// ------------------------------------------------------------------------------------------------

/// One immutable snapshot of the bucket's table directory.
///
/// Scans hold a snapshot for their whole lifetime; refreshes install a
/// fresh one without disturbing holders of the old.
#[derive(Default)]
pub struct ManifestView {
    /// Per-stream interval → table handle.
    tables: HashMap<String, HashMap<(TimeUuid, TimeUuid), Arc<SsTable>>>,

    /// Per-stream interval tree over the same intervals.
    itrees: HashMap<String, IntervalTree>,
}

impl ManifestView {
    /// SSTables of `stream` whose interval intersects `[lo, hi]`.
    pub fn overlapping_ssts(
        &self,
        stream: &str,
        lo: &TimeUuid,
        hi: &TimeUuid,
    ) -> Vec<Arc<SsTable>> {
        let (Some(itree), Some(tables)) = (self.itrees.get(stream), self.tables.get(stream))
        else {
            return Vec::new();
        };
        itree
            .overlap(lo, hi)
            .into_iter()
            .filter_map(|interval| tables.get(&interval).cloned())
            .collect()
    }

    /// Every table of `stream`, unordered.
    pub fn stream_ssts(&self, stream: &str) -> Vec<Arc<SsTable>> {
        self.tables
            .get(stream)
            .map(|tables| tables.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stream names present in the bucket, sorted.
    pub fn streams(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total number of tables across all streams.
    pub fn table_count(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }
}

// ------------------------------------------------------------------------------------------------
// Manifest
// ------------------------------------------------------------------------------------------------

/// The live table directory, refreshed from the bucket.
pub struct Manifest {
    bucket: Arc<dyn Bucket>,

    /// Key prefix scoping this manifest (namespace isolation).
    key_prefix: String,

    /// Current view, swapped wholesale on refresh.
    view: RwLock<Arc<ManifestView>>,
}

impl Manifest {
    /// Creates an empty manifest; call [`refresh`](Self::refresh) to
    /// populate it.
    pub fn new(bucket: Arc<dyn Bucket>, key_prefix: impl Into<String>) -> Self {
        Self {
            bucket,
            key_prefix: key_prefix.into(),
            view: RwLock::new(Arc::new(ManifestView::default())),
        }
    }

    /// Re-enumerates the bucket and installs a fresh view.
    ///
    /// Tables that fail to open are logged and skipped.
    pub fn refresh(&self) -> Result<(), ManifestError> {
        let root = format!("{}sstables/", self.key_prefix);
        let listing = self.bucket.list(&root, Some('/'))?;

        let mut tables: HashMap<String, HashMap<(TimeUuid, TimeUuid), Arc<SsTable>>> =
            HashMap::new();

        for stream_prefix in listing.prefixes {
            let stream_listing = self.bucket.list(&stream_prefix, None)?;
            let idx_keys: std::collections::HashSet<&String> = stream_listing
                .keys
                .iter()
                .filter(|key| key[stream_prefix.len()..].starts_with("idx_"))
                .collect();

            for key in stream_listing
                .keys
                .iter()
                .filter(|key| key[stream_prefix.len()..].starts_with("sst_"))
            {
                // A payload without its index sibling is a half-finished
                // upload; it stays invisible until a retry completes both.
                let sibling = format!(
                    "{stream_prefix}idx_{}",
                    &key[stream_prefix.len() + "sst_".len()..]
                );
                if !idx_keys.contains(&sibling) {
                    warn!(key = %key, "skipping sstable without index object");
                    continue;
                }

                let table = match SsTable::open(Arc::clone(&self.bucket), key) {
                    Ok(table) => table,
                    Err(e) => {
                        warn!(key = %key, error = %e, "skipping unreadable sstable");
                        continue;
                    }
                };
                tables
                    .entry(table.stream.clone())
                    .or_default()
                    .insert(table.interval(), Arc::new(table));
            }
        }

        let itrees = tables
            .iter()
            .map(|(stream, stream_tables)| {
                (
                    stream.clone(),
                    IntervalTree::build(stream_tables.keys().copied().collect()),
                )
            })
            .collect();

        let fresh = Arc::new(ManifestView { tables, itrees });
        info!(
            prefix = %root,
            streams = fresh.tables.len(),
            tables = fresh.table_count(),
            "manifest refreshed"
        );

        let mut guard = self
            .view
            .write()
            .map_err(|_| ManifestError::Internal("RwLock poisoned".into()))?;
        *guard = fresh;
        Ok(())
    }

    /// Snapshot of the current view for the duration of a scan.
    pub fn view(&self) -> Result<Arc<ManifestView>, ManifestError> {
        let guard = self
            .view
            .read()
            .map_err(|_| ManifestError::Internal("RwLock poisoned".into()))?;
        Ok(Arc::clone(&guard))
    }

    /// SSTables of `stream` whose interval intersects `[lo, hi]`, from the
    /// current view.
    pub fn overlapping_ssts(
        &self,
        stream: &str,
        lo: &TimeUuid,
        hi: &TimeUuid,
    ) -> Result<Vec<Arc<SsTable>>, ManifestError> {
        let view = self.view()?;
        let hits = view.overlapping_ssts(stream, lo, hi);
        debug!(stream, hits = hits.len(), "manifest overlap query");
        Ok(hits)
    }

    /// Stream names known to the current view, sorted.
    pub fn streams(&self) -> Result<Vec<String>, ManifestError> {
        Ok(self.view()?.streams())
    }
}
