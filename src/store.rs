//! Payload storage.
//!
//! Serialized compute results are stored as opaque blobs under
//! `<cache_dir>/objects/`, named by cache key with git-style sharding (first
//! two hex characters as subdirectory). Writes land in a temporary file and
//! are renamed into place, so a reader never observes a partially written
//! payload and writers for different keys never share a path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::fingerprint::CacheKey;

/// Subdirectory for payload objects within the cache directory.
const OBJECTS_SUBDIR: &str = "objects";

/// Blob store addressed by cache key.
pub struct PayloadStore {
    cache_dir: PathBuf,
}

impl PayloadStore {
    /// Create a store rooted at the given cache directory.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    /// Payload reference for a key, relative to the cache directory.
    /// This is the form recorded in index entries.
    pub fn payload_ref(key: &CacheKey) -> String {
        let hex = key.to_hex();
        let (prefix, suffix) = hex.split_at(2);
        format!("{OBJECTS_SUBDIR}/{prefix}/{suffix}")
    }

    /// Resolve a payload reference to an absolute path.
    pub fn resolve(&self, payload_ref: &str) -> PathBuf {
        self.cache_dir.join(payload_ref)
    }

    /// Write a payload for the given key, returning its payload reference.
    ///
    /// The containing directory is created if absent.
    pub fn write(&self, key: &CacheKey, payload: &[u8]) -> Result<String, StoreError> {
        let payload_ref = Self::payload_ref(key);
        let path = self.resolve(&payload_ref);

        let parent = path.parent().unwrap();
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        // Write atomically (temp file, then rename); PID + thread ID in the
        // temp name so concurrent writers never collide
        let temp_name = format!(
            "{}.tmp.{}.{:?}",
            path.file_name().unwrap().to_str().unwrap(),
            std::process::id(),
            std::thread::current().id()
        );
        let temp_path = parent.join(temp_name);

        let mut file = fs::File::create(&temp_path).map_err(|source| StoreError::Io {
            path: temp_path.clone(),
            source,
        })?;
        file.write_all(payload).map_err(|source| StoreError::Io {
            path: temp_path.clone(),
            source,
        })?;
        file.sync_all().map_err(|source| StoreError::Io {
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(payload_ref)
    }

    /// Read a payload by reference.
    ///
    /// A missing object is reported as [`StoreError::NotFound`], distinct
    /// from other I/O failures.
    pub fn read(&self, payload_ref: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(payload_ref);

        if !path.exists() {
            return Err(StoreError::NotFound { path });
        }

        fs::read(&path).map_err(|source| StoreError::Io { path, source })
    }

    /// Whether a payload object exists for the given reference.
    pub fn exists(&self, payload_ref: &str) -> bool {
        self.resolve(payload_ref).exists()
    }

    /// Size in bytes of the payload behind a reference, if present.
    pub fn size(&self, payload_ref: &str) -> Option<u64> {
        fs::metadata(self.resolve(payload_ref)).ok().map(|m| m.len())
    }

    /// List payload references currently present on disk, sorted.
    ///
    /// Temporary files left behind by interrupted writes are skipped. Used
    /// by maintenance to find objects no index entry references.
    pub fn list_refs(&self) -> Result<Vec<String>, StoreError> {
        let objects_dir = self.cache_dir.join(OBJECTS_SUBDIR);
        let mut refs = Vec::new();

        if !objects_dir.exists() {
            return Ok(refs);
        }

        let shards = fs::read_dir(&objects_dir).map_err(|source| StoreError::Io {
            path: objects_dir.clone(),
            source,
        })?;

        for shard in shards {
            let shard = shard.map_err(|source| StoreError::Io {
                path: objects_dir.clone(),
                source,
            })?;
            if !shard.path().is_dir() {
                continue;
            }
            let shard_name = shard.file_name().to_string_lossy().to_string();

            let objects = fs::read_dir(shard.path()).map_err(|source| StoreError::Io {
                path: shard.path(),
                source,
            })?;
            for object in objects {
                let object = object.map_err(|source| StoreError::Io {
                    path: shard.path(),
                    source,
                })?;
                let name = object.file_name().to_string_lossy().to_string();
                if name.contains(".tmp.") {
                    continue;
                }
                refs.push(format!("{OBJECTS_SUBDIR}/{shard_name}/{name}"));
            }
        }

        refs.sort();
        Ok(refs)
    }

    /// Delete a payload object. A missing object is not an error.
    pub fn remove(&self, payload_ref: &str) -> Result<(), StoreError> {
        let path = self.resolve(payload_ref);

        if path.exists() {
            fs::remove_file(&path).map_err(|source| StoreError::Io { path, source })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{compute_key, to_params};
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_key(n: u64) -> CacheKey {
        let params = to_params(&json!({ "n": n })).unwrap();
        compute_key(&params, None).unwrap()
    }

    #[test]
    fn write_and_read_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = PayloadStore::new(temp.path());

        let key = sample_key(1);
        let payload_ref = store.write(&key, b"annotation records").unwrap();

        assert_eq!(store.read(&payload_ref).unwrap(), b"annotation records");
        assert!(store.exists(&payload_ref));
        assert_eq!(store.size(&payload_ref), Some(18));
    }

    #[test]
    fn payload_ref_is_sharded_by_key() {
        let key = sample_key(2);
        let payload_ref = PayloadStore::payload_ref(&key);
        let hex = key.to_hex();

        assert_eq!(payload_ref, format!("objects/{}/{}", &hex[..2], &hex[2..]));
    }

    #[test]
    fn read_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = PayloadStore::new(temp.path());

        let payload_ref = PayloadStore::payload_ref(&sample_key(3));
        let err = store.read(&payload_ref).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(err.is_miss());
    }

    #[test]
    fn rewrite_same_key_replaces_content() {
        let temp = TempDir::new().unwrap();
        let store = PayloadStore::new(temp.path());

        let key = sample_key(4);
        store.write(&key, b"first").unwrap();
        let payload_ref = store.write(&key, b"second").unwrap();

        assert_eq!(store.read(&payload_ref).unwrap(), b"second");
    }

    #[test]
    fn list_refs_skips_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = PayloadStore::new(temp.path());

        let key = sample_key(5);
        let payload_ref = store.write(&key, b"data").unwrap();

        // Simulate a leftover temp file from an interrupted write
        let stale = store.resolve(&payload_ref).with_extension("tmp.99999.x");
        fs::write(&stale, b"partial").unwrap();

        assert_eq!(store.list_refs().unwrap(), vec![payload_ref]);
    }

    #[test]
    fn remove_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = PayloadStore::new(temp.path());

        let key = sample_key(6);
        let payload_ref = store.write(&key, b"data").unwrap();

        store.remove(&payload_ref).unwrap();
        assert!(!store.exists(&payload_ref));
        store.remove(&payload_ref).unwrap();
    }
}
