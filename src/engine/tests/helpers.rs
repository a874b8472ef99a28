use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::bucket::{Bucket, MemoryBucket};
use crate::engine::{EngineError, EventStream, ObjectStorageSettings, StreamEngine};
use crate::record::TIMESTAMP_FIELD;

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

/// Engine settings with thresholds small enough for quick rotation.
pub fn test_settings(scratch: &TempDir) -> ObjectStorageSettings {
    ObjectStorageSettings {
        local_dir: scratch.path().to_path_buf(),
        index_block_size: 2 * 1024,
        min_size: 2 * 1024 * 1024,
        max_size: 4 * 1024 * 1024,
        compress_factor: 0.6,
        max_memtable_size: 64 * 1024 * 1024,
        flush_queue_depth: 4,
    }
}

/// An engine over a fresh in-memory bucket.
pub fn test_engine(scratch: &TempDir) -> (Arc<MemoryBucket>, StreamEngine) {
    let bucket = Arc::new(MemoryBucket::new());
    let engine =
        StreamEngine::new("test", Arc::clone(&bucket) as Arc<dyn Bucket>, test_settings(scratch))
            .unwrap();
    (bucket, engine)
}

/// Synthetic payloads with explicit `@time` stamps.
pub fn generate_payloads(start_time: u64, interval: u64, n: usize) -> Vec<Map<String, Value>> {
    let mut out = Vec::with_capacity(n);
    let mut t = start_time;
    for i in 0..n {
        let mut payload = Map::new();
        payload.insert(TIMESTAMP_FIELD.to_string(), Value::from(t));
        payload.insert("seq".to_string(), Value::from(i as u64));
        out.push(payload);
        t += interval;
    }
    out
}

/// Collects a retrieve stream into decoded payload maps.
pub fn collect_events(stream: EventStream) -> Vec<Map<String, Value>> {
    stream
        .collect::<Result<Vec<_>, EngineError>>()
        .unwrap()
        .into_iter()
        .map(|bytes| match serde_json::from_slice(&bytes).unwrap() {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {other}"),
        })
        .collect()
}

/// Sequence numbers of decoded events, in arrival order.
pub fn seqs(events: &[Map<String, Value>]) -> Vec<u64> {
    events
        .iter()
        .map(|event| event.get("seq").and_then(Value::as_u64).unwrap())
        .collect()
}

/// Rotates and waits for the push to land.
pub fn flush_and_wait(engine: &StreamEngine) {
    engine.flush().unwrap();
    assert!(
        engine.wait_for_flush(Duration::from_secs(30)),
        "flush did not complete in time"
    );
}
