//! Read-only diagnostics over the cache.
//!
//! These helpers never mutate state and stay off the hot path. Enumeration
//! does not touch payloads; per-entry inspection checks payload presence
//! and deserializability and reports the result instead of failing.

use serde::Serialize;

use crate::cache::MemoCache;
use crate::error::IndexError;
use crate::fingerprint::CacheKey;
use crate::index::CacheEntry;

/// One enumerated index entry, payload unvalidated.
#[derive(Debug, Clone)]
pub struct EntryDescriptor {
    /// The entry's cache key.
    pub key: CacheKey,

    /// The entry's index record.
    pub entry: CacheEntry,
}

/// Validity report for a single entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    /// Whether an index entry exists for the key.
    pub exists: bool,

    /// Whether the referenced payload is present and deserializes.
    pub valid: bool,

    /// What went wrong, when invalid.
    pub error: Option<String>,
}

/// Enumerate all index entries without validating payloads.
pub fn list_entries(cache: &MemoCache) -> Result<Vec<EntryDescriptor>, IndexError> {
    Ok(cache
        .index()
        .list()?
        .into_iter()
        .map(|(key, entry)| EntryDescriptor { key, entry })
        .collect())
}

/// Check a single entry: index record present, payload present, payload
/// deserializes.
pub fn inspect_entry(cache: &MemoCache, key: &CacheKey) -> EntryReport {
    let Some(entry) = cache.index().lookup(key) else {
        return EntryReport {
            exists: false,
            valid: false,
            error: Some("no index entry for key".to_string()),
        };
    };

    match cache.store().read(&entry.payload_ref) {
        Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(_) => EntryReport {
                exists: true,
                valid: true,
                error: None,
            },
            Err(e) => EntryReport {
                exists: true,
                valid: false,
                error: Some(format!("payload does not deserialize: {e}")),
            },
        },
        Err(e) => EntryReport {
            exists: true,
            valid: false,
            error: Some(e.to_string()),
        },
    }
}
