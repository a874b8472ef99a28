#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::memtable::tests::helpers::generate_events;
    use crate::memtable::{MemTable, MemTableError};

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let memtable = MemTable::create(tmp.path()).unwrap();

        let events = generate_events(10, 10, 100);
        for event in &events {
            memtable.insert("stream", event).unwrap();
        }

        for event in &events {
            let got = memtable.get("stream", &event.id()).unwrap();
            assert_eq!(got.as_ref(), Some(event));
        }
    }

    #[test]
    fn test_get_absent_key_is_none() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let memtable = MemTable::create(tmp.path()).unwrap();

        let events = generate_events(10, 10, 1);
        assert_eq!(memtable.get("stream", &events[0].id()).unwrap(), None);
    }

    #[test]
    fn test_insert_overwrites_same_key() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let memtable = MemTable::create(tmp.path()).unwrap();

        let event = &generate_events(10, 10, 1)[0];
        memtable.insert("stream", event).unwrap();
        memtable.insert("stream", event).unwrap();

        let all: Vec<_> = memtable.stream_iter("stream", None, None).unwrap().collect();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_sealed_rejects_writes() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let memtable = MemTable::create(tmp.path()).unwrap();
        let event = &generate_events(10, 10, 1)[0];

        memtable.seal();
        assert!(matches!(
            memtable.insert("stream", event),
            Err(MemTableError::Sealed(_))
        ));
    }

    #[test]
    fn test_size_reports_on_disk_bytes() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let memtable = MemTable::create(tmp.path()).unwrap();

        let before = memtable.size().unwrap();
        for event in generate_events(10, 10, 10) {
            memtable.insert("stream", &event).unwrap();
        }
        assert!(memtable.size().unwrap() > before);
    }

    #[test]
    fn test_destroy_removes_log() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let memtable = MemTable::create(tmp.path()).unwrap();
        memtable
            .insert("stream", &generate_events(10, 10, 1)[0])
            .unwrap();

        let path = memtable.path().to_path_buf();
        assert!(path.exists());
        memtable.destroy().unwrap();
        assert!(!path.exists());
    }
}
