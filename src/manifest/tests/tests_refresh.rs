#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Map, Value};
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::bucket::{Bucket, MemoryBucket};
    use crate::manifest::Manifest;
    use crate::record::{EventRecord, ID_FIELD, Record, TIMESTAMP_FIELD};
    use crate::sstable::{PushbackIter, SstConfig, SstOptions, create_sstable};
    use crate::timeuuid::{EntropyKind, TimeUuid};

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn generate_events(start_time: u64, interval: u64, n: usize) -> Vec<Record> {
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

    fn build_sst(bucket: &MemoryBucket, stream: &str, start_time: u64, n: usize) {
        let mut input = PushbackIter::new(generate_events(start_time, 10, n).into_iter());
        create_sstable(
            bucket,
            "",
            stream,
            &mut input,
            &SstConfig::default(),
            &SstOptions::default(),
        )
        .unwrap();
    }

    /// The four reference tables: [100,1100], [200,1200], [500,1500],
    /// [1400,2400] in tick time.
    fn build_reference_tables(bucket: &MemoryBucket, stream: &str) {
        build_sst(bucket, stream, 100, 101);
        build_sst(bucket, stream, 200, 101);
        build_sst(bucket, stream, 500, 101);
        build_sst(bucket, stream, 1400, 101);
    }

    #[test]
    fn test_refresh_discovers_streams_and_tables() {
        init_tracing();

        let bucket = Arc::new(MemoryBucket::new());
        build_reference_tables(&bucket, "alpha");
        build_reference_tables(&bucket, "beta");

        let manifest = Manifest::new(bucket, "");
        manifest.refresh().unwrap();

        assert_eq!(manifest.streams().unwrap(), vec!["alpha", "beta"]);
        assert_eq!(manifest.view().unwrap().table_count(), 8);
    }

    #[test]
    fn test_overlap_queries_per_reference_counts() {
        init_tracing();

        let bucket = Arc::new(MemoryBucket::new());
        build_reference_tables(&bucket, "s");

        let manifest = Manifest::new(bucket, "");
        manifest.refresh().unwrap();

        for (qs, qe, expected) in [(150u64, 300u64, 2), (400, 600, 3), (100, 1500, 4), (2000, 2100, 1)] {
            let lo = TimeUuid::from_time(qs, EntropyKind::Lowest);
            let hi = TimeUuid::from_time(qe, EntropyKind::Highest);
            let hits = manifest.overlapping_ssts("s", &lo, &hi).unwrap();
            assert_eq!(hits.len(), expected, "query [{qs}, {qe}]");
            for sst in hits {
                assert!(sst.start_id <= hi && sst.end_id >= lo);
            }
        }
    }

    #[test]
    fn test_streams_are_isolated() {
        init_tracing();

        let bucket = Arc::new(MemoryBucket::new());
        build_reference_tables(&bucket, "one");
        build_reference_tables(&bucket, "two");

        let manifest = Manifest::new(bucket, "");
        manifest.refresh().unwrap();

        let lo = TimeUuid::from_time(100, EntropyKind::Lowest);
        let hi = TimeUuid::from_time(1500, EntropyKind::Highest);
        for stream in ["one", "two"] {
            let hits = manifest.overlapping_ssts(stream, &lo, &hi).unwrap();
            assert_eq!(hits.len(), 4);
            for sst in hits {
                assert_eq!(sst.stream, stream);
            }
        }
    }

    #[test]
    fn test_unreadable_table_is_skipped() {
        init_tracing();

        let bucket = Arc::new(MemoryBucket::new());
        build_sst(&bucket, "s", 100, 10);
        // A payload with no metadata attributes cannot be opened.
        bucket
            .put("sstables/s/sst_garbage", &mut &b"junk"[..], &Default::default())
            .unwrap();

        let manifest = Manifest::new(bucket, "");
        manifest.refresh().unwrap();
        assert_eq!(manifest.view().unwrap().table_count(), 1);
    }

    #[test]
    fn test_payload_without_index_stays_invisible() {
        init_tracing();

        let bucket = Arc::new(MemoryBucket::new());
        let mut input = PushbackIter::new(generate_events(100, 10, 10).into_iter());
        let handle = create_sstable(
            bucket.as_ref(),
            "",
            "s",
            &mut input,
            &SstConfig::default(),
            &SstOptions::default(),
        )
        .unwrap();

        // Simulate a half-finished upload by dropping the index object.
        bucket.delete(&handle.index_key).unwrap();

        let manifest = Manifest::new(bucket, "");
        manifest.refresh().unwrap();
        assert_eq!(manifest.view().unwrap().table_count(), 0);
    }

    #[test]
    fn test_key_prefix_scopes_the_directory() {
        init_tracing();

        let bucket = Arc::new(MemoryBucket::new());
        let mut input = PushbackIter::new(generate_events(100, 10, 10).into_iter());
        create_sstable(
            bucket.as_ref(),
            "ns1/",
            "s",
            &mut input,
            &SstConfig::default(),
            &SstOptions::default(),
        )
        .unwrap();

        let scoped = Manifest::new(Arc::clone(&bucket) as Arc<dyn Bucket>, "ns1/");
        scoped.refresh().unwrap();
        assert_eq!(scoped.view().unwrap().table_count(), 1);

        let unscoped = Manifest::new(bucket, "");
        unscoped.refresh().unwrap();
        assert_eq!(unscoped.view().unwrap().table_count(), 0);
    }

    #[test]
    fn test_refresh_swaps_view_wholesale() {
        init_tracing();

        let bucket = Arc::new(MemoryBucket::new());
        build_sst(&bucket, "s", 100, 10);

        let manifest = Manifest::new(Arc::clone(&bucket) as Arc<dyn Bucket>, "");
        manifest.refresh().unwrap();
        let old_view = manifest.view().unwrap();
        assert_eq!(old_view.table_count(), 1);

        build_sst(&bucket, "s", 5_000, 10);
        manifest.refresh().unwrap();

        // The snapshot taken before the refresh is untouched.
        assert_eq!(old_view.table_count(), 1);
        assert_eq!(manifest.view().unwrap().table_count(), 2);
    }
}
