//! # TempusDB
//!
//! An object-storage-backed **time-series event store** built on a
//! log-structured merge (LSM) pipeline. Clients append JSON events to
//! named streams under namespaces and retrieve them in time-sorted order
//! over half-open time ranges; every event carries a server-assigned
//! monotonic time-UUID that doubles as its ordering key.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Router                             │
//! │        (namespace, stream) → backend, settings checks      │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                    StreamEngine                      │  │
//! │  │  ┌────────────┐   ┌─────────────┐   ┌─────────────┐  │  │
//! │  │  │   Active    │   │   Sealed    │   │  SSTables   │  │  │
//! │  │  │  MemTable   │   │  MemTables  │   │ (in bucket) │  │  │
//! │  │  │  (+ WAL)    │   │  (+ WALs)   │   │             │  │  │
//! │  │  └─────┬──────┘   └──────┬──────┘   └──────┬──────┘  │  │
//! │  │        │  rotate         │  push            │        │  │
//! │  │        └────────►        └─────────►        │        │  │
//! │  │                                             │        │  │
//! │  │  ┌──────────────────────────────────────────┘        │  │
//! │  │  │   Manifest (per-stream interval trees)            │  │
//! │  │  └───────────────────────────────────────────────────┘  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`timeuuid`] | Ordering keys with embedded 100 ns timestamps and a lexicographic codec |
//! | [`record`] | Tagged record variants (event, tombstone, index) and their wire form |
//! | [`wal`] | Generic, CRC-protected write-ahead log backing memtable durability |
//! | [`memtable`] | Local ordered KV write buffer keyed by `stream ‖ id` |
//! | [`bucket`] | Object-store capability trait with filesystem and in-memory impls |
//! | [`sstable`] | Immutable block-compressed tables in the bucket: writer, reader, scans |
//! | [`manifest`] | Table directory with per-stream interval trees for overlap queries |
//! | [`engine`] | Flush/recovery orchestration, k-way merged reads, backend façade |
//!
//! ## Key Properties
//!
//! - **Write-ahead logging** — every insert is durable in the local
//!   memtable log before it is acknowledged; surviving logs are re-pushed
//!   after a restart.
//! - **Immutable tables** — flushes upload block-compressed SSTables plus
//!   a separate index object; readers fetch byte-exact ranges covering
//!   only the blocks a query touches.
//! - **Range tombstones** — deletes write a tombstone that shadows
//!   matching events across every layer until a future compaction.
//! - **Merged reads** — retrieval k-way-merges the memtables with all
//!   overlapping tables, memtables winning ties, tombstones reconciled
//!   in-stream, ascending or descending.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use serde_json::{Map, json};
//! use tempusdb::bucket::FsBucket;
//! use tempusdb::engine::{ObjectStorage, RetrieveOptions, Storage};
//!
//! let bucket = Arc::new(FsBucket::open("/var/lib/tempusdb/bucket").unwrap());
//! let mut options = HashMap::new();
//! options.insert("local_dir".to_string(), json!("/var/lib/tempusdb/scratch"));
//!
//! let storage = ObjectStorage::new(bucket, &["default"], &options).unwrap();
//!
//! // Append
//! let mut event = Map::new();
//! event.insert("city".to_string(), json!("berlin"));
//! storage.insert("default", "checkins", vec![event]).unwrap();
//!
//! // Read back
//! let window = RetrieveOptions {
//!     start_time: 0,
//!     end_time: u64::MAX,
//!     ..RetrieveOptions::default()
//! };
//! for event in storage.retrieve("default", "checkins", &window).unwrap() {
//!     println!("{}", String::from_utf8_lossy(&event.unwrap()));
//! }
//!
//! // Graceful shutdown
//! storage.stop();
//! ```

pub mod bucket;
pub mod engine;
pub mod manifest;
pub mod memtable;
pub mod record;
pub mod sstable;
pub mod timeuuid;
pub mod wal;
