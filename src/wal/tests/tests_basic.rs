#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    use crate::wal::{Wal, WalError};

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestOp {
        key: Vec<u8>,
        value: Vec<u8>,
    }

    fn op(key: &[u8], value: &[u8]) -> TestOp {
        TestOp {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_append_and_replay() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(Wal::<TestOp>::file_name(7));
        let wal = Wal::<TestOp>::open(&path, None).unwrap();

        wal.append(&op(b"a", b"1")).unwrap();
        wal.append(&op(b"b", b"2")).unwrap();
        wal.append(&op(b"c", b"3")).unwrap();

        let replayed: Vec<_> = wal
            .replay_iter()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(replayed, vec![op(b"a", b"1"), op(b"b", b"2"), op(b"c", b"3")]);
    }

    #[test]
    fn test_reopen_preserves_records() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(Wal::<TestOp>::file_name(42));

        {
            let wal = Wal::<TestOp>::open(&path, None).unwrap();
            wal.append(&op(b"k", b"v")).unwrap();
        }

        let wal = Wal::<TestOp>::open(&path, None).unwrap();
        assert_eq!(wal.memtable_id(), 42);
        let replayed: Vec<_> = wal
            .replay_iter()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(replayed, vec![op(b"k", b"v")]);
    }

    #[test]
    fn test_rejects_bad_file_name() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("not-a-wal.txt");
        assert!(matches!(
            Wal::<TestOp>::open(&path, None),
            Err(WalError::Internal(_))
        ));
    }

    #[test]
    fn test_record_too_large() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(Wal::<TestOp>::file_name(1));
        let wal = Wal::<TestOp>::open(&path, Some(64)).unwrap();

        let big = op(b"k", &vec![0u8; 1024]);
        assert!(matches!(
            wal.append(&big),
            Err(WalError::RecordTooLarge(_))
        ));
    }

    #[test]
    fn test_truncate_clears_records() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(Wal::<TestOp>::file_name(9));
        let wal = Wal::<TestOp>::open(&path, None).unwrap();

        wal.append(&op(b"a", b"1")).unwrap();
        wal.truncate().unwrap();

        let replayed: Vec<_> = wal.replay_iter().unwrap().collect();
        assert!(replayed.is_empty());
    }

    #[test]
    fn test_file_size_grows() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(Wal::<TestOp>::file_name(3));
        let wal = Wal::<TestOp>::open(&path, None).unwrap();

        let before = wal.file_size().unwrap();
        wal.append(&op(b"a", b"1")).unwrap();
        assert!(wal.file_size().unwrap() > before);
    }
}
