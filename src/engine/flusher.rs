//! Background flusher — pushes sealed memtables to the bucket.
//!
//! One long-running worker thread drains the engine's sealed queue. Each
//! sealed memtable is pushed stream by stream (one SSTable per stream —
//! memtables are size-bounded, so `split` never applies), the manifest is
//! refreshed to make the new tables visible, and only then is the
//! memtable removed from the readable set and its log destroyed.
//!
//! A failed push leaves the memtable sealed at the head of the queue; the
//! next flush signal retries it. Retries are idempotent because the SST
//! writer refuses to overwrite an existing `(stream, start_id)` payload —
//! the worker treats that refusal as "already pushed" and moves on.
//!
//! Being the only consumer, the worker also serializes pushes: two
//! workers racing on one sealed memtable (the unguarded case in the
//! original design) cannot happen in-process.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, bounded};
use tracing::{debug, error, info, warn};

use crate::memtable::MemTable;
use crate::sstable::{PushbackIter, SSTableError, SsTable, SstOptions, create_sstable};

use super::{EngineCore, EngineError};

// ------------------------------------------------------------------------------------------------
// Flusher
// ------------------------------------------------------------------------------------------------

/// Handle to the background pusher thread.
pub(crate) struct Flusher {
    tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Flusher {
    /// Spawns the worker and returns its handle.
    pub(crate) fn spawn(core: Arc<EngineCore>) -> Result<Self, EngineError> {
        let (tx, rx) = bounded::<()>(core.settings.flush_queue_depth);
        let namespace = core.namespace.clone();
        let handle = std::thread::Builder::new()
            .name(format!("flusher-{namespace}"))
            .spawn(move || worker_loop(core, rx))
            .map_err(EngineError::Io)?;
        Ok(Self { tx, handle })
    }

    /// Wakes the worker; collapses with an already-pending wakeup.
    pub(crate) fn notify(&self) {
        // A full signal queue already guarantees a future drain pass.
        let _ = self.tx.try_send(());
    }

    /// Stops the worker and waits for the in-flight push to finish.
    pub(crate) fn shutdown(self) {
        drop(self.tx);
        if self.handle.join().is_err() {
            error!("flusher thread panicked during shutdown");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Worker
// ------------------------------------------------------------------------------------------------

/// Drains the sealed queue on every signal until the channel closes.
fn worker_loop(core: Arc<EngineCore>, rx: Receiver<()>) {
    debug!(namespace = %core.namespace, "flusher started");
    while rx.recv().is_ok() {
        drain_sealed(&core);
    }
    debug!(namespace = %core.namespace, "flusher stopped");
}

/// Pushes sealed memtables oldest-first until the queue is empty or a
/// push fails.
fn drain_sealed(core: &EngineCore) {
    loop {
        let Some(store) = core.oldest_sealed() else {
            return;
        };

        match push_store(core, &store) {
            Ok(pushed) => {
                info!(
                    namespace = %core.namespace,
                    memtable = store.id(),
                    sstables = pushed,
                    "memtable pushed"
                );

                if let Err(e) = core.manifest.refresh() {
                    // New tables stay invisible until the next refresh;
                    // the memtable stays readable meanwhile.
                    warn!(namespace = %core.namespace, error = %e, "manifest refresh failed after push");
                }

                // Reclaim the log first; readers keep their in-memory
                // snapshot until the queue entry goes away.
                if let Err(e) = store.destroy() {
                    warn!(memtable = store.id(), error = %e, "failed to remove pushed memtable log");
                }
                core.remove_sealed(&store);
            }
            Err(e) => {
                // Leave the memtable sealed; the next flush signal retries.
                error!(
                    namespace = %core.namespace,
                    memtable = store.id(),
                    error = %e,
                    "memtable push failed, will retry"
                );
                return;
            }
        }
    }
}

/// Uploads one SSTable per stream of the sealed memtable.
///
/// Returns the number of tables uploaded (already-present tables count —
/// they are this memtable's tables from an earlier attempt).
fn push_store(core: &EngineCore, store: &MemTable) -> Result<usize, EngineError> {
    let mut pushed = 0usize;
    for (stream, records) in store.streams_iter()? {
        let mut input = PushbackIter::new(records);
        let opts = SstOptions {
            memtable_id: Some(store.id()),
            split: false,
            ..SstOptions::default()
        };

        match create_sstable(
            core.bucket.as_ref(),
            &core.key_prefix,
            &stream,
            &mut input,
            &core.sst_config,
            &opts,
        ) {
            Ok(handle) => {
                debug!(stream = %stream, key = %handle.key, records = handle.num_records, "stream flushed");
                pushed += 1;
            }
            Err(SSTableError::AlreadyExists(key)) => {
                // Either a previous attempt got this far, or another
                // memtable's table landed on the same start id. Only the
                // former may be skipped; the lineage attribute tells them
                // apart.
                let existing = SsTable::open(Arc::clone(&core.bucket), &key)?;
                if existing.memtable_id != Some(store.id()) {
                    return Err(EngineError::Internal(format!(
                        "sstable key collision at {key}: owned by memtable {:?}",
                        existing.memtable_id
                    )));
                }
                info!(stream = %stream, key = %key, "sstable already uploaded, skipping");
                pushed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(pushed)
}
