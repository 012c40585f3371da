//! Durable index of cache entries.
//!
//! Two layouts sit behind one contract. The centralized layout keeps every
//! entry in a single `index.json` document; an insert is a read-merge-write
//! of the whole document so unrelated keys are never dropped. The
//! decentralized layout keeps one document per entry under `entries/`,
//! named by cache key, so inserts never rewrite unrelated entries and
//! enumeration is a directory scan. Which layout is active is configuration;
//! callers see the same behavior either way.
//!
//! Every document write is published via temp file + rename, so a reader
//! never observes a torn document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::IndexLayout;
use crate::error::IndexError;
use crate::fingerprint::{CacheKey, Params};

/// Shared index document name (centralized layout).
const INDEX_FILE: &str = "index.json";

/// Per-entry document directory (decentralized layout).
const ENTRIES_SUBDIR: &str = "entries";

/// One index record.
///
/// Entries are created once, on a miss, and never mutated afterwards; a
/// change in parameters or code fingerprint lands under a new key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Parameter values the entry was computed from, kept for audit.
    pub parameters: Params,

    /// Code fingerprint at compute time; empty when none was supplied.
    pub code_version: String,

    /// Payload location, relative to the cache directory.
    pub payload_ref: String,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

/// Index over cache entries, centralized or decentralized per configuration.
pub struct CacheIndex {
    cache_dir: PathBuf,
    layout: IndexLayout,
}

impl CacheIndex {
    /// Create an index over the given cache directory.
    pub fn new(cache_dir: &Path, layout: IndexLayout) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            layout,
        }
    }

    fn index_path(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILE)
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(ENTRIES_SUBDIR)
            .join(format!("{}.json", key.to_hex()))
    }

    /// Look up the entry for a key, if any.
    ///
    /// Fail-safe: an unreadable document degrades to `None` with a warning,
    /// so a damaged index turns into recomputation rather than a hard error.
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.layout {
            IndexLayout::Centralized => match self.load_shared() {
                Ok(entries) => entries.get(&key.to_hex()).cloned(),
                Err(e) => {
                    warn!(key = %key, error = %e, "index unreadable, treating as miss");
                    None
                }
            },
            IndexLayout::Decentralized => {
                let path = self.entry_path(key);
                let content = fs::read_to_string(&path).ok()?;
                match serde_json::from_str(&content) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(key = %key, error = %e, "entry document unreadable, treating as miss");
                        None
                    }
                }
            }
        }
    }

    /// Insert an entry at a key.
    ///
    /// Centralized layout merges into the shared document. A shared document
    /// that cannot be parsed fails the insert: merging into it would drop
    /// every existing entry.
    pub fn insert(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), IndexError> {
        match self.layout {
            IndexLayout::Centralized => {
                let mut entries = self.load_shared()?;
                entries.insert(key.to_hex(), entry);
                self.write_document(&self.index_path(), &entries)
            }
            IndexLayout::Decentralized => self.write_document(&self.entry_path(key), &entry),
        }
    }

    /// All entries currently recorded, sorted by key.
    ///
    /// Decentralized documents that do not parse are skipped with a warning;
    /// `inspect_entry` reports on them individually.
    pub fn list(&self) -> Result<Vec<(CacheKey, CacheEntry)>, IndexError> {
        match self.layout {
            IndexLayout::Centralized => {
                let entries = self.load_shared()?;
                Ok(entries
                    .into_iter()
                    .filter_map(|(hex, entry)| {
                        let key = CacheKey::from_hex(&hex);
                        if key.is_none() {
                            warn!(name = %hex, "skipping index entry with malformed key");
                        }
                        key.map(|k| (k, entry))
                    })
                    .collect())
            }
            IndexLayout::Decentralized => {
                let entries_dir = self.cache_dir.join(ENTRIES_SUBDIR);
                let mut entries = Vec::new();

                if !entries_dir.exists() {
                    return Ok(entries);
                }

                let dir = fs::read_dir(&entries_dir).map_err(|source| IndexError::Io {
                    path: entries_dir.clone(),
                    source,
                })?;

                for item in dir {
                    let item = item.map_err(|source| IndexError::Io {
                        path: entries_dir.clone(),
                        source,
                    })?;
                    let path = item.path();

                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let Some(key) = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(CacheKey::from_hex)
                    else {
                        continue;
                    };

                    let content = fs::read_to_string(&path).map_err(|source| IndexError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    match serde_json::from_str(&content) {
                        Ok(entry) => entries.push((key, entry)),
                        Err(e) => {
                            warn!(key = %key, error = %e, "skipping unreadable entry document")
                        }
                    }
                }

                entries.sort_by_key(|(key, _)| *key);
                Ok(entries)
            }
        }
    }

    /// Remove the entry at a key, if present. Maintenance only; the
    /// controller never deletes entries.
    pub fn remove(&self, key: &CacheKey) -> Result<(), IndexError> {
        match self.layout {
            IndexLayout::Centralized => {
                let mut entries = self.load_shared()?;
                if entries.remove(&key.to_hex()).is_some() {
                    self.write_document(&self.index_path(), &entries)?;
                }
                Ok(())
            }
            IndexLayout::Decentralized => {
                let path = self.entry_path(key);
                if path.exists() {
                    fs::remove_file(&path)
                        .map_err(|source| IndexError::Io { path, source })?;
                }
                Ok(())
            }
        }
    }

    fn load_shared(&self) -> Result<BTreeMap<String, CacheEntry>, IndexError> {
        let path = self.index_path();

        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&path).map_err(|source| IndexError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| IndexError::Parse {
            path,
            reason: e.to_string(),
        })
    }

    /// Serialize a document and publish it via temp file + rename.
    fn write_document<T: Serialize>(&self, path: &Path, document: &T) -> Result<(), IndexError> {
        let parent = path.parent().unwrap();
        fs::create_dir_all(parent).map_err(|source| IndexError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let json = serde_json::to_string_pretty(document)
            .map_err(|source| IndexError::Encode { source })?;

        let temp_name = format!(
            "{}.tmp.{}.{:?}",
            path.file_name().unwrap().to_str().unwrap(),
            std::process::id(),
            std::thread::current().id()
        );
        let temp_path = parent.join(temp_name);

        let mut file = fs::File::create(&temp_path).map_err(|source| IndexError::Io {
            path: temp_path.clone(),
            source,
        })?;
        file.write_all(json.as_bytes())
            .map_err(|source| IndexError::Io {
                path: temp_path.clone(),
                source,
            })?;
        file.sync_all().map_err(|source| IndexError::Io {
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
