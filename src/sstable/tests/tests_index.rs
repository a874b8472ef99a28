#[cfg(test)]
mod tests {
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::sstable::tests::helpers::{build_and_open, generate_events};

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    #[test]
    fn test_index_is_consistent() {
        init_tracing();

        let records = generate_events(10, 10, 1000);
        let (_bucket, _handle, table) = build_and_open(records);

        let index = table.index().unwrap();
        assert!(index.is_consistent());
        assert!(index.records().len() > 1, "test config must yield many blocks");
        assert_eq!(index.records()[0].offset, 0);
    }

    #[test]
    fn test_data_offsets_full_range() {
        init_tracing();

        let records = generate_events(10, 10, 1000);
        let first = records[0].id();
        let last = records.last().unwrap().id();
        let (_bucket, handle, table) = build_and_open(records);

        let index = table.index().unwrap();
        let (start, end) = index.data_offsets(Some(&first), Some(&last));
        assert_eq!(start, 0);
        assert_eq!(end, handle.size);

        // Open bounds cover the same range.
        assert_eq!(index.data_offsets(None, None), (0, handle.size));
    }

    #[test]
    fn test_block_offsets_are_contiguous() {
        init_tracing();

        let records = generate_events(10, 10, 1000);
        let first = records[0].id();
        let last = records.last().unwrap().id();
        let (_bucket, handle, table) = build_and_open(records);

        let index = table.index().unwrap();
        let mut prev_end = None;
        for (start, end) in index.block_offsets(Some(&first), Some(&last), false) {
            match prev_end {
                None => assert_eq!(start, 0),
                Some(prev) => assert_eq!(start, prev),
            }
            prev_end = Some(end);
        }
        assert_eq!(prev_end, Some(handle.size));
    }

    #[test]
    fn test_block_offsets_reverse_mirrors_forward() {
        init_tracing();

        let records = generate_events(10, 10, 1000);
        let first = records[0].id();
        let last = records.last().unwrap().id();
        let (_bucket, _handle, table) = build_and_open(records);

        let index = table.index().unwrap();
        let forward = index.block_offsets(Some(&first), Some(&last), false);
        let mut reverse = index.block_offsets(Some(&first), Some(&last), true);
        reverse.reverse();
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_sub_range_offsets_nest_in_full_range() {
        init_tracing();

        let records = generate_events(10, 10, 1000);
        let (_bucket, handle, table) = build_and_open(records.clone());

        let index = table.index().unwrap();
        let (full_start, full_end) = index.data_offsets(None, None);
        let (sub_start, sub_end) =
            index.data_offsets(Some(&records[300].id()), Some(&records[400].id()));
        assert!(full_start <= sub_start);
        assert!(sub_start < sub_end);
        assert!(sub_end <= full_end);
        assert!(sub_end - sub_start < handle.size, "sub range must not cover everything");
    }

    #[test]
    fn test_range_outside_data_is_empty() {
        init_tracing();

        let records = generate_events(1_000, 10, 100);
        let (_bucket, _handle, table) = build_and_open(records);

        let before = crate::timeuuid::TimeUuid::from_time(1, crate::timeuuid::EntropyKind::Lowest);
        let also_before =
            crate::timeuuid::TimeUuid::from_time(5, crate::timeuuid::EntropyKind::Highest);
        let index = table.index().unwrap();
        let (start, end) = index.data_offsets(Some(&before), Some(&also_before));
        assert_eq!(start, end, "range below all data must be empty");
    }
}
