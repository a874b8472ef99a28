use std::sync::Arc;

use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::{Map, Value};

use crate::bucket::MemoryBucket;
use crate::record::{EventRecord, ID_FIELD, Record, TIMESTAMP_FIELD};
use crate::sstable::{PushbackIter, SsTable, SstConfig, SstHandle, SstOptions, create_sstable};
use crate::timeuuid::{EntropyKind, TimeUuid};

/// Thresholds small enough to exercise block and table boundaries quickly.
pub fn test_config() -> SstConfig {
    SstConfig {
        index_block_size: 2 * 1024,
        min_size: 2 * 1024 * 1024,
        max_size: 4 * 1024 * 1024,
        compress_factor: 0.6,
    }
}

/// Generates `n` synthetic events starting at `start_time` ticks, spaced
/// `interval` ticks apart, each padded with an incompressible filler so
/// that staged block sizes track the estimator.
pub fn generate_events(start_time: u64, interval: u64, n: usize) -> Vec<Record> {
    let mut rng = rand::rng();
    let mut out = Vec::with_capacity(n);
    let mut t = start_time;
    for i in 0..n {
        let id = TimeUuid::from_time(t, EntropyKind::Random);
        let filler: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(128)
            .map(char::from)
            .collect();
        let mut payload = Map::new();
        payload.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        payload.insert(TIMESTAMP_FIELD.to_string(), Value::from(t));
        payload.insert("seq".to_string(), Value::from(i as u64));
        payload.insert("filler".to_string(), Value::String(filler));
        out.push(Record::Event(EventRecord::from_payload(payload).unwrap()));
        t += interval;
    }
    out
}

/// Builds one SSTable in a fresh in-memory bucket and reopens it.
pub fn build_and_open(records: Vec<Record>) -> (Arc<MemoryBucket>, SstHandle, SsTable) {
    let bucket = Arc::new(MemoryBucket::new());
    let mut input = PushbackIter::new(records.into_iter());
    let handle = create_sstable(
        bucket.as_ref(),
        "",
        "stream",
        &mut input,
        &test_config(),
        &SstOptions::default(),
    )
    .unwrap();
    assert!(!input.peek_some(), "non-split build must drain its input");

    let table = SsTable::open(bucket.clone(), &handle.key).unwrap();
    (bucket, handle, table)
}

/// Drains a scan iterator, panicking on mid-stream errors.
pub fn collect_scan(
    table: &SsTable,
    lo: Option<TimeUuid>,
    hi: Option<TimeUuid>,
    reverse: bool,
) -> Vec<Record> {
    table
        .iterator(lo, hi, reverse)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}
