//! # Bucket Module
//!
//! The engine's object-store capability. SSTables live in a bucket as
//! immutable objects with attached string metadata; this module defines the
//! small surface the rest of the engine is allowed to assume:
//!
//! - metadata probe, existence check, conditional put, byte-range get,
//!   delimiter-aware listing, delete.
//!
//! Auth and transport specifics belong to [`Bucket`] implementations, not
//! to the engine. Two implementations ship in-tree:
//!
//! - [`FsBucket`] — a directory-backed bucket storing metadata in JSON
//!   sidecar files; serves single-node deploys and the test suite.
//! - [`MemoryBucket`] — a map-backed bucket for unit tests.
//!
//! ## Guarantees required from implementations
//!
//! - `put` is **conditional**: it must fail with
//!   [`BucketError::AlreadyExists`] when the key is present. The SST
//!   writer's idempotent-retry story rests on this.
//! - `get_range(key, lo, hi, sink)` streams exactly the half-open byte
//!   range `[lo, hi)` and reports the count copied.
//! - `list` with a delimiter groups keys below the first delimiter past
//!   the prefix into common prefixes, the way S3-style stores do.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;
use tracing::{debug, trace};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by bucket operations.
#[derive(Debug, Error)]
pub enum BucketError {
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A conditional put found the key already present.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// The requested byte range exceeds the object.
    #[error("byte range {lo}..{hi} out of bounds for {key} ({size} bytes)")]
    BadRange {
        key: String,
        lo: u64,
        hi: u64,
        size: u64,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Metadata sidecar failed to (de)serialize.
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Capability types
// ------------------------------------------------------------------------------------------------

/// Object-level string metadata attributes.
pub type Attrs = HashMap<String, String>;

/// Result of a metadata probe.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,

    /// Attached metadata attributes.
    pub attrs: Attrs,
}

/// Result of a listing call.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Keys directly under the prefix, sorted.
    pub keys: Vec<String>,

    /// Common prefixes collapsed at the delimiter, sorted.
    pub prefixes: Vec<String>,
}

/// The object-store operations the engine depends on.
pub trait Bucket: Send + Sync {
    /// True when an object exists at `key`.
    fn exists(&self, key: &str) -> Result<bool, BucketError>;

    /// Size and metadata attributes of the object at `key`.
    fn get_metadata(&self, key: &str) -> Result<ObjectMeta, BucketError>;

    /// Streams the half-open byte range `[lo, hi)` of `key` into `sink`,
    /// returning the number of bytes copied.
    fn get_range(
        &self,
        key: &str,
        lo: u64,
        hi: u64,
        sink: &mut dyn Write,
    ) -> Result<u64, BucketError>;

    /// Stores an immutable object, reading `data` to end. Fails with
    /// [`BucketError::AlreadyExists`] when the key is taken.
    fn put(&self, key: &str, data: &mut dyn Read, attrs: &Attrs) -> Result<(), BucketError>;

    /// Lists keys under `prefix`. With a delimiter, keys containing the
    /// delimiter past the prefix are grouped into `prefixes` (ending in
    /// the delimiter), mirroring hierarchical object-store listings.
    fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing, BucketError>;

    /// Removes the object at `key`, if present.
    fn delete(&self, key: &str) -> Result<(), BucketError>;
}

/// Splits raw keys into a [`Listing`] according to the delimiter rule.
fn build_listing<I: IntoIterator<Item = String>>(
    raw_keys: I,
    prefix: &str,
    delimiter: Option<char>,
) -> Listing {
    let mut keys = Vec::new();
    let mut prefixes: Vec<String> = Vec::new();

    for key in raw_keys {
        if !key.starts_with(prefix) {
            continue;
        }
        match delimiter.and_then(|d| key[prefix.len()..].find(d).map(|i| (d, i))) {
            Some((d, idx)) => {
                let common = &key[..prefix.len() + idx + d.len_utf8()];
                if prefixes.last().map(String::as_str) != Some(common) {
                    prefixes.push(common.to_string());
                }
            }
            None => keys.push(key),
        }
    }

    keys.sort();
    prefixes.sort();
    prefixes.dedup();
    Listing { keys, prefixes }
}

// ------------------------------------------------------------------------------------------------
// FsBucket
// ------------------------------------------------------------------------------------------------

/// Suffix of the JSON metadata sidecar written next to every object.
const ATTRS_SUFFIX: &str = ".attrs";

/// A directory-backed bucket.
///
/// Objects are plain files below the root; metadata attributes live in a
/// JSON sidecar (`<key>.attrs`). The conditional-put guarantee is enforced
/// with `O_EXCL` file creation.
pub struct FsBucket {
    root: PathBuf,
}

impl FsBucket {
    /// Opens (and creates if needed) a bucket rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, BucketError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn attrs_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{ATTRS_SUFFIX}"))
    }

    /// Collects every object key under the root, sidecars excluded.
    fn walk_keys(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), BucketError> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk_keys(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                let key = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
                if !key.ends_with(ATTRS_SUFFIX) {
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

impl Bucket for FsBucket {
    fn exists(&self, key: &str) -> Result<bool, BucketError> {
        Ok(self.object_path(key).exists())
    }

    fn get_metadata(&self, key: &str) -> Result<ObjectMeta, BucketError> {
        let path = self.object_path(key);
        let meta = fs::metadata(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BucketError::NotFound(key.to_string())
            } else {
                BucketError::Io(e)
            }
        })?;

        let attrs_path = self.attrs_path(key);
        let attrs = if attrs_path.exists() {
            serde_json::from_slice(&fs::read(&attrs_path)?)?
        } else {
            Attrs::new()
        };

        Ok(ObjectMeta {
            size: meta.len(),
            attrs,
        })
    }

    fn get_range(
        &self,
        key: &str,
        lo: u64,
        hi: u64,
        sink: &mut dyn Write,
    ) -> Result<u64, BucketError> {
        let path = self.object_path(key);
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BucketError::NotFound(key.to_string())
            } else {
                BucketError::Io(e)
            }
        })?;

        let size = file.metadata()?.len();
        if lo > hi || hi > size {
            return Err(BucketError::BadRange {
                key: key.to_string(),
                lo,
                hi,
                size,
            });
        }

        file.seek(SeekFrom::Start(lo))?;
        let copied = io::copy(&mut file.take(hi - lo), sink)?;
        trace!(key, lo, hi, copied, "bucket range read");
        Ok(copied)
    }

    fn put(&self, key: &str, data: &mut dyn Read, attrs: &Attrs) -> Result<(), BucketError> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    BucketError::AlreadyExists(key.to_string())
                } else {
                    BucketError::Io(e)
                }
            })?;
        let bytes = io::copy(data, &mut file)?;
        file.sync_all()?;

        fs::write(self.attrs_path(key), serde_json::to_vec(attrs)?)?;

        debug!(key, bytes, "bucket object stored");
        Ok(())
    }

    fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing, BucketError> {
        let mut raw = Vec::new();
        self.walk_keys(&self.root, &mut raw)?;
        Ok(build_listing(raw, prefix, delimiter))
    }

    fn delete(&self, key: &str) -> Result<(), BucketError> {
        let path = self.object_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        let attrs = self.attrs_path(key);
        if attrs.exists() {
            fs::remove_file(attrs)?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// MemoryBucket
// ------------------------------------------------------------------------------------------------

/// A map-backed bucket for unit tests.
#[derive(Default)]
pub struct MemoryBucket {
    objects: Mutex<BTreeMap<String, (Vec<u8>, Attrs)>>,
}

impl MemoryBucket {
    /// Creates an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bucket for MemoryBucket {
    fn exists(&self, key: &str) -> Result<bool, BucketError> {
        let guard = self
            .objects
            .lock()
            .map_err(|_| BucketError::Internal("Mutex poisoned".into()))?;
        Ok(guard.contains_key(key))
    }

    fn get_metadata(&self, key: &str) -> Result<ObjectMeta, BucketError> {
        let guard = self
            .objects
            .lock()
            .map_err(|_| BucketError::Internal("Mutex poisoned".into()))?;
        let (data, attrs) = guard
            .get(key)
            .ok_or_else(|| BucketError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            attrs: attrs.clone(),
        })
    }

    fn get_range(
        &self,
        key: &str,
        lo: u64,
        hi: u64,
        sink: &mut dyn Write,
    ) -> Result<u64, BucketError> {
        let guard = self
            .objects
            .lock()
            .map_err(|_| BucketError::Internal("Mutex poisoned".into()))?;
        let (data, _) = guard
            .get(key)
            .ok_or_else(|| BucketError::NotFound(key.to_string()))?;

        let size = data.len() as u64;
        if lo > hi || hi > size {
            return Err(BucketError::BadRange {
                key: key.to_string(),
                lo,
                hi,
                size,
            });
        }

        sink.write_all(&data[lo as usize..hi as usize])?;
        Ok(hi - lo)
    }

    fn put(&self, key: &str, data: &mut dyn Read, attrs: &Attrs) -> Result<(), BucketError> {
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)?;

        let mut guard = self
            .objects
            .lock()
            .map_err(|_| BucketError::Internal("Mutex poisoned".into()))?;
        if guard.contains_key(key) {
            return Err(BucketError::AlreadyExists(key.to_string()));
        }
        guard.insert(key.to_string(), (buf, attrs.clone()));
        Ok(())
    }

    fn list(&self, prefix: &str, delimiter: Option<char>) -> Result<Listing, BucketError> {
        let guard = self
            .objects
            .lock()
            .map_err(|_| BucketError::Internal("Mutex poisoned".into()))?;
        Ok(build_listing(
            guard.keys().cloned().collect::<Vec<_>>(),
            prefix,
            delimiter,
        ))
    }

    fn delete(&self, key: &str) -> Result<(), BucketError> {
        let mut guard = self
            .objects
            .lock()
            .map_err(|_| BucketError::Internal("Mutex poisoned".into()))?;
        guard.remove(key);
        Ok(())
    }
}
