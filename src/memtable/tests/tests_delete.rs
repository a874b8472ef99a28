#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::memtable::MemTable;
    use crate::memtable::tests::helpers::{assert_sorted, generate_events};
    use crate::record::Record;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    #[test]
    fn test_range_delete_leaves_tombstone() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let memtable = MemTable::create(tmp.path()).unwrap();

        let events = generate_events(10, 10, 100);
        for event in &events {
            memtable.insert("stream", event).unwrap();
        }

        // Wipes events[30..=70] — 41 entries.
        let wiped = memtable
            .delete("stream", events[30].id(), events[70].id())
            .unwrap();
        assert_eq!(wiped, 41);

        // 59 surviving events + 1 tombstone.
        let remaining: Vec<_> = memtable.stream_iter("stream", None, None).unwrap().collect();
        assert_eq!(remaining.len(), 60);
        assert_sorted(&remaining);
        assert_eq!(
            remaining
                .iter()
                .filter(|r| matches!(r, Record::Delete(_)))
                .count(),
            1
        );

        // The tombstone sits at the range start and remembers the range end.
        match memtable.get("stream", &events[30].id()).unwrap() {
            Some(Record::Delete(tomb)) => {
                assert_eq!(tomb.start_id, events[30].id());
                assert_eq!(tomb.end_id, events[70].id());
            }
            other => panic!("expected tombstone at range start, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_is_stream_scoped() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let memtable = MemTable::create(tmp.path()).unwrap();

        let events = generate_events(10, 10, 10);
        for event in &events {
            memtable.insert("keep", event).unwrap();
            memtable.insert("drop", event).unwrap();
        }

        memtable
            .delete("drop", events[0].id(), events[9].id())
            .unwrap();

        assert_eq!(memtable.stream_iter("keep", None, None).unwrap().count(), 10);
        // Only the tombstone remains in the deleted stream.
        assert_eq!(memtable.stream_iter("drop", None, None).unwrap().count(), 1);
    }

    #[test]
    fn test_delete_empty_range_still_records_tombstone() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let memtable = MemTable::create(tmp.path()).unwrap();

        let events = generate_events(10, 10, 2);
        let wiped = memtable
            .delete("stream", events[0].id(), events[1].id())
            .unwrap();
        assert_eq!(wiped, 0);

        let all: Vec<_> = memtable.stream_iter("stream", None, None).unwrap().collect();
        assert_eq!(all.len(), 1);
        assert!(matches!(all[0], Record::Delete(_)));
    }
}
