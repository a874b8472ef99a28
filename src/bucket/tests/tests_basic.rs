#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use crate::bucket::{Attrs, Bucket, BucketError, FsBucket, MemoryBucket};

    fn attrs(pairs: &[(&str, &str)]) -> Attrs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn each_bucket(test: impl Fn(&dyn Bucket)) {
        let tmp = TempDir::new().unwrap();
        let fs_bucket = FsBucket::open(tmp.path()).unwrap();
        test(&fs_bucket);
        let mem_bucket = MemoryBucket::new();
        test(&mem_bucket);
    }

    #[test]
    fn test_put_get_metadata_round_trip() {
        each_bucket(|bucket| {
            let meta_in = attrs(&[("start_id", "\"abc\""), ("size", "3")]);
            bucket.put("sstables/s/sst_1", &mut &b"xyz"[..], &meta_in).unwrap();

            assert!(bucket.exists("sstables/s/sst_1").unwrap());
            let meta = bucket.get_metadata("sstables/s/sst_1").unwrap();
            assert_eq!(meta.size, 3);
            assert_eq!(meta.attrs, meta_in);
        });
    }

    #[test]
    fn test_put_refuses_existing_key() {
        each_bucket(|bucket| {
            bucket.put("k", &mut &b"1"[..], &HashMap::new()).unwrap();
            assert!(matches!(
                bucket.put("k", &mut &b"2"[..], &HashMap::new()),
                Err(BucketError::AlreadyExists(_))
            ));
        });
    }

    #[test]
    fn test_get_metadata_missing_key() {
        each_bucket(|bucket| {
            assert!(matches!(
                bucket.get_metadata("nope"),
                Err(BucketError::NotFound(_))
            ));
        });
    }

    #[test]
    fn test_get_range_half_open() {
        each_bucket(|bucket| {
            bucket
                .put("blob", &mut &b"0123456789"[..], &HashMap::new())
                .unwrap();

            let mut out = Vec::new();
            let copied = bucket.get_range("blob", 2, 6, &mut out).unwrap();
            assert_eq!(copied, 4);
            assert_eq!(out, b"2345");

            let mut all = Vec::new();
            assert_eq!(bucket.get_range("blob", 0, 10, &mut all).unwrap(), 10);
            assert_eq!(all, b"0123456789");
        });
    }

    #[test]
    fn test_get_range_out_of_bounds() {
        each_bucket(|bucket| {
            bucket.put("blob", &mut &b"abc"[..], &HashMap::new()).unwrap();
            let mut out = Vec::new();
            assert!(matches!(
                bucket.get_range("blob", 0, 4, &mut out),
                Err(BucketError::BadRange { .. })
            ));
        });
    }

    #[test]
    fn test_list_with_delimiter_groups_streams() {
        each_bucket(|bucket| {
            for key in [
                "sstables/cat/sst_1",
                "sstables/cat/idx_1",
                "sstables/dog/sst_2",
                "other/ignored",
            ] {
                bucket.put(key, &mut &b"x"[..], &HashMap::new()).unwrap();
            }

            let listing = bucket.list("sstables/", Some('/')).unwrap();
            assert!(listing.keys.is_empty());
            assert_eq!(listing.prefixes, vec!["sstables/cat/", "sstables/dog/"]);

            let cat = bucket.list("sstables/cat/sst_", None).unwrap();
            assert_eq!(cat.keys, vec!["sstables/cat/sst_1"]);
            assert!(cat.prefixes.is_empty());
        });
    }

    #[test]
    fn test_delete_is_idempotent() {
        each_bucket(|bucket| {
            bucket.put("k", &mut &b"1"[..], &HashMap::new()).unwrap();
            bucket.delete("k").unwrap();
            assert!(!bucket.exists("k").unwrap());
            bucket.delete("k").unwrap();
        });
    }
}
