use serde_json::{Map, Value};

use crate::record::{EventRecord, ID_FIELD, Record, TIMESTAMP_FIELD};
use crate::timeuuid::{EntropyKind, TimeUuid};

/// Generates `n` synthetic events starting at `start_time` ticks, spaced
/// `interval` ticks apart.
pub fn generate_events(start_time: u64, interval: u64, n: usize) -> Vec<Record> {
    let mut out = Vec::with_capacity(n);
    let mut t = start_time;
    for _ in 0..n {
        let id = TimeUuid::from_time(t, EntropyKind::Random);
        let mut payload = Map::new();
        payload.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        payload.insert(TIMESTAMP_FIELD.to_string(), Value::from(t));
        out.push(Record::Event(EventRecord::from_payload(payload).unwrap()));
        t += interval;
    }
    out
}

/// Asserts that records are in ascending time order.
pub fn assert_sorted(records: &[Record]) {
    let mut last = 0u64;
    for record in records {
        assert!(
            record.time() >= last,
            "records must be in ascending time order"
        );
        last = record.time();
    }
}
