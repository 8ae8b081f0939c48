//! Opaque memoization caches.
//!
//! Parsed count files, activity matrices and converted trajectory traces are
//! expensive to derive, so they are memoized behind the narrow [`CacheStore`]
//! interface. Components receive a store by injection; they never touch cache
//! files directly.
//!
//! Entries are keyed by [`CacheKey`] (namespace, configuration family and
//! [`ConfigKey`]) and are write-once: a `put` on a key that already exists is a
//! no-op, so repeated or parallel invocations stay idempotent.
//!
//! # Security
//!
//! Namespaces and configuration ids become directory names and are restricted
//! to alphanumeric characters, dashes, underscores and dots.

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::{AnomalyError, Result};
use crate::key::ConfigKey;

/// Maximum allowed identifier length.
const MAX_ID_LENGTH: usize = 256;

// ---------------------------------------------------------------------------
// CacheKey
// ---------------------------------------------------------------------------

/// Content-addressed key of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Kind of derived value (`content`, `matrix`, `trajectory`).
    pub namespace: String,
    /// Configuration family, usually the raw-data folder name.
    pub config_id: String,
    /// Window and ratio of the configuration.
    pub key: ConfigKey,
}

impl CacheKey {
    /// Create a cache key.
    pub fn new(namespace: impl Into<String>, config_id: impl Into<String>, key: ConfigKey) -> Self {
        Self {
            namespace: namespace.into(),
            config_id: config_id.into(),
            key,
        }
    }

    /// Path of the entry relative to a cache root, after validating ids.
    pub fn relative_path(&self) -> Result<PathBuf> {
        validate_path_id(&self.namespace)?;
        validate_path_id(&self.config_id)?;
        let dir = format!("{}_{}", self.config_id, self.namespace);
        let file = self.key.file_name().replace(".txt", ".bin");
        Ok(PathBuf::from(dir).join(file))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.config_id, self.key)
    }
}

/// Reject identifiers that could escape the cache root.
fn validate_path_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(AnomalyError::InvalidKey("cache identifier cannot be empty".into()));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(AnomalyError::InvalidKey(format!(
            "cache identifier too long: {} (max: {MAX_ID_LENGTH})",
            id.len()
        )));
    }
    if id.starts_with('.') {
        return Err(AnomalyError::InvalidKey(format!(
            "cache identifier cannot start with '.': {id}"
        )));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(AnomalyError::InvalidKey(format!(
            "invalid character {c:?} in cache identifier {id}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Byte-level cache interface.
pub trait CacheStore: Send + Sync {
    /// Whether an entry is present for `key`.
    fn exists(&self, key: &CacheKey) -> Result<bool>;

    /// Raw bytes stored under `key`, or `None` on a miss.
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`. Must not overwrite an existing entry.
    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()>;
}

impl std::fmt::Debug for dyn CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn CacheStore")
    }
}

/// Typed access on top of [`CacheStore`], encoded with bincode.
pub trait CacheExt: CacheStore {
    /// Decode the value stored under `key`.
    ///
    /// An entry that fails to decode is reported as a miss so the caller
    /// regenerates it from raw input.
    fn get_value<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let Some(bytes) = self.get(key)? else {
            debug!("Cache miss: {key}");
            return Ok(None);
        };
        match bincode::serde::decode_from_slice::<T, _>(&bytes, bincode::config::standard()) {
            Ok((value, _)) => {
                debug!("Cache hit: {key}");
                Ok(Some(value))
            }
            Err(e) => {
                warn!("Discarding corrupt cache entry {key}: {e}");
                Ok(None)
            }
        }
    }

    /// Encode and store `value` under `key`.
    fn put_value<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| AnomalyError::Serialization(e.to_string()))?;
        self.put(key, &bytes)
    }
}

impl<C: CacheStore + ?Sized> CacheExt for C {}

// ---------------------------------------------------------------------------
// FileCache
// ---------------------------------------------------------------------------

/// One file per entry under a root directory.
///
/// Writes go to a temporary sibling file that is renamed into place, so a
/// reader never observes a partially written entry.
#[derive(Debug)]
pub struct FileCache {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileCache {
    /// Create a cache rooted at `root`. The directory is created lazily.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// Root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &CacheKey) -> Result<PathBuf> {
        Ok(self.root.join(key.relative_path()?))
    }
}

impl CacheStore for FileCache {
    fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entry_path(key)?.is_file())
    }

    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AnomalyError::io(path, e)),
        }
    }

    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()> {
        let path = self.entry_path(key)?;
        if path.is_file() {
            debug!("Cache entry {key} already present, keeping first write");
            return Ok(());
        }
        let dir = path
            .parent()
            .ok_or_else(|| AnomalyError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(dir).map_err(|e| AnomalyError::io(dir, e))?;

        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(
            ".{}.{}.{seq}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("entry"),
            std::process::id()
        ));
        {
            let mut file = fs::File::create(&tmp).map_err(|e| AnomalyError::io(&tmp, e))?;
            file.write_all(bytes).map_err(|e| AnomalyError::io(&tmp, e))?;
            file.sync_all().map_err(|e| AnomalyError::io(&tmp, e))?;
        }

        // Another writer may have finished while we were writing.
        if path.is_file() {
            let _ = fs::remove_file(&tmp);
            return Ok(());
        }
        fs::rename(&tmp, &path).map_err(|e| AnomalyError::io(&path, e))?;
        debug!("Cached {key} ({} bytes)", bytes.len());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

/// In-process cache for tests and short-lived runs. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, Vec<u8>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CacheStore for MemoryCache {
    fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()> {
        self.entries
            .write()
            .entry(key.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(ns: &str) -> CacheKey {
        CacheKey::new(ns, "data_allanomaly", ConfigKey::new(100, 10).unwrap())
    }

    #[test]
    fn relative_path_layout() {
        let path = key("content").relative_path().unwrap();
        assert_eq!(
            path,
            PathBuf::from("data_allanomaly_content").join("result_ratio10_cycle100.bin")
        );
    }

    #[test]
    fn rejects_traversal_ids() {
        for bad in ["", "..", ".hidden", "a/b", "a\\b"] {
            let k = CacheKey::new("content", bad, ConfigKey::new(1, 1).unwrap());
            assert!(k.relative_path().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn file_cache_round_trip() {
        let tmp = tempdir().unwrap();
        let cache = FileCache::new(tmp.path());
        let k = key("matrix");

        assert!(!cache.exists(&k).unwrap());
        assert!(cache.get(&k).unwrap().is_none());

        cache.put_value(&k, &vec![1.5f64, 2.5]).unwrap();
        assert!(cache.exists(&k).unwrap());
        let back: Vec<f64> = cache.get_value(&k).unwrap().unwrap();
        assert_eq!(back, vec![1.5, 2.5]);
    }

    #[test]
    fn first_writer_wins() {
        let tmp = tempdir().unwrap();
        let cache = FileCache::new(tmp.path());
        let k = key("content");

        cache.put(&k, b"first").unwrap();
        cache.put(&k, b"second").unwrap();
        assert_eq!(cache.get(&k).unwrap().unwrap(), b"first");

        let mem = MemoryCache::new();
        mem.put(&k, b"first").unwrap();
        mem.put(&k, b"second").unwrap();
        assert_eq!(mem.get(&k).unwrap().unwrap(), b"first");
        assert_eq!(mem.len(), 1);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let tmp = tempdir().unwrap();
        let cache = FileCache::new(tmp.path());
        let k = key("content");
        cache.put(&k, b"payload").unwrap();

        let dir = tmp.path().join("data_allanomaly_content");
        let names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["result_ratio10_cycle100.bin".to_string()]);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let mem = MemoryCache::new();
        let k = key("matrix");
        mem.put(&k, &[0xff, 0xff, 0xff]).unwrap();
        let value: Option<Vec<String>> = mem.get_value(&k).unwrap();
        assert!(value.is_none());
    }
}
