//! Memoizing controller.
//!
//! [`MemoCache`] wraps an expensive, deterministic compute function:
//! repeated calls with the same parameters (and code fingerprint) are
//! served from the payload store instead of recomputing. Read-side faults
//! degrade to recomputation; only key derivation and the compute function
//! itself can fail a call.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, IndexError, StoreError};
use crate::fingerprint::{compute_key, CacheKey, CodeFingerprint, Params};
use crate::index::{CacheEntry, CacheIndex};
use crate::lock::CacheLock;
use crate::logging::{operations, status};
use crate::store::PayloadStore;

/// Outcome of a single cached call.
#[derive(Debug, Clone)]
pub struct CacheReport {
    /// Key the call resolved to.
    pub key: CacheKey,

    /// Whether the value was served from the cache.
    pub hit: bool,

    /// Whether this call created a new entry.
    pub created: bool,

    /// Payload location relative to the cache directory.
    pub payload_ref: String,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of entries in the index.
    pub total_entries: usize,

    /// Total size of the payloads those entries reference.
    pub total_payload_bytes: u64,
}

/// Result of a maintenance sweep.
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    /// Index entries removed because their payload was gone.
    pub dangling_entries_removed: usize,

    /// Payload objects removed because no entry referenced them.
    pub orphaned_payloads_removed: usize,
}

/// Memoization cache over a directory of payloads and index documents.
///
/// All operations are synchronous, blocking filesystem calls; callers on a
/// concurrent runtime should keep them off latency-sensitive paths.
pub struct MemoCache {
    config: CacheConfig,
    index: CacheIndex,
    store: PayloadStore,
}

impl MemoCache {
    /// Open a cache at the configured directory, creating it if absent.
    pub fn new(config: CacheConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.dir).map_err(|source| StoreError::Io {
            path: config.dir.clone(),
            source,
        })?;

        let index = CacheIndex::new(&config.dir, config.layout);
        let store = PayloadStore::new(&config.dir);

        Ok(Self {
            config,
            index,
            store,
        })
    }

    /// The index backing this cache.
    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    /// The payload store backing this cache.
    pub fn store(&self) -> &PayloadStore {
        &self.store
    }

    /// Return the cached value for `params`, or compute, store, and index a
    /// new one.
    ///
    /// A dangling entry (payload missing or corrupt) is treated as a miss;
    /// the fresh insert supersedes it at the same key. Compute failures
    /// propagate unchanged.
    pub fn get_or_compute<T, E, F>(
        &self,
        params: &Params,
        code: Option<&CodeFingerprint>,
        compute: F,
    ) -> Result<T, CacheError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&Params) -> Result<T, E>,
    {
        self.get_or_compute_with_report(params, code, compute)
            .map(|(value, _)| value)
    }

    /// Like [`MemoCache::get_or_compute`], also returning a [`CacheReport`]
    /// describing how the call was served.
    pub fn get_or_compute_with_report<T, E, F>(
        &self,
        params: &Params,
        code: Option<&CodeFingerprint>,
        compute: F,
    ) -> Result<(T, CacheReport), CacheError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&Params) -> Result<T, E>,
    {
        let key = compute_key(params, code)?;

        if let Some(entry) = self.index.lookup(&key) {
            match self.load_payload::<T>(&entry) {
                Ok(value) => {
                    info!(
                        operation = operations::GET,
                        status = status::HIT,
                        key = %key,
                        payload = %entry.payload_ref,
                        "cache hit"
                    );
                    return Ok((
                        value,
                        CacheReport {
                            key,
                            hit: true,
                            created: false,
                            payload_ref: entry.payload_ref,
                        },
                    ));
                }
                Err(e) if e.is_miss() => {
                    warn!(
                        operation = operations::GET,
                        status = status::DANGLING,
                        key = %key,
                        error = %e,
                        "dangling entry, recomputing"
                    );
                }
                Err(e) => {
                    warn!(
                        operation = operations::GET,
                        status = status::ERROR,
                        key = %key,
                        error = %e,
                        "payload read failed, recomputing"
                    );
                }
            }
        } else {
            debug!(
                operation = operations::GET,
                status = status::MISS,
                key = %key,
                "cache miss"
            );
        }

        let value = compute(params).map_err(CacheError::Compute)?;

        let payload =
            serde_json::to_vec(&value).map_err(|source| StoreError::Encode { source })?;

        // Exclusive over the miss write sequence: payload publish, then
        // index insert
        let _lock = CacheLock::acquire(
            &self.config.dir,
            Duration::from_secs(self.config.lock_timeout_secs),
        )
        .map_err(|source| IndexError::Lock {
            path: self.config.dir.clone(),
            source,
        })?;

        let payload_ref = self.store.write(&key, &payload)?;

        let entry = CacheEntry {
            parameters: params.clone(),
            code_version: code.map(|c| c.as_str().to_string()).unwrap_or_default(),
            payload_ref: payload_ref.clone(),
            created_at: Utc::now(),
        };
        self.index.insert(&key, entry)?;

        info!(
            operation = operations::PUT,
            status = status::CREATED,
            key = %key,
            payload = %payload_ref,
            size_bytes = payload.len(),
            "entry created"
        );

        Ok((
            value,
            CacheReport {
                key,
                hit: false,
                created: true,
                payload_ref,
            },
        ))
    }

    /// Read and deserialize the payload behind an index entry.
    pub(crate) fn load_payload<T: DeserializeOwned>(
        &self,
        entry: &CacheEntry,
    ) -> Result<T, StoreError> {
        let bytes = self.store.read(&entry.payload_ref)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: self.store.resolve(&entry.payload_ref),
            reason: e.to_string(),
        })
    }

    /// Aggregate statistics over the index and payload store.
    pub fn stats(&self) -> Result<CacheStats, IndexError> {
        let entries = self.index.list()?;
        let total_payload_bytes = entries
            .iter()
            .filter_map(|(_, entry)| self.store.size(&entry.payload_ref))
            .sum();

        Ok(CacheStats {
            total_entries: entries.len(),
            total_payload_bytes,
        })
    }

    /// Maintenance sweep: drop index entries whose payload is gone and
    /// delete payload objects no entry references.
    ///
    /// Never runs automatically. Valid entries are untouched, including
    /// entries stranded by code fingerprint changes; sweeping those is an
    /// operator decision, not cache policy.
    pub fn gc(&self) -> Result<GcReport, IndexError> {
        let mut report = GcReport::default();
        let mut live_refs = Vec::new();

        for (key, entry) in self.index.list()? {
            if self.store.exists(&entry.payload_ref) {
                live_refs.push(entry.payload_ref);
            } else {
                self.index.remove(&key)?;
                report.dangling_entries_removed += 1;
                info!(
                    operation = operations::GC,
                    key = %key,
                    "removed dangling entry"
                );
            }
        }

        match self.store.list_refs() {
            Ok(refs) => {
                for payload_ref in refs {
                    if live_refs.contains(&payload_ref) {
                        continue;
                    }
                    match self.store.remove(&payload_ref) {
                        Ok(()) => {
                            report.orphaned_payloads_removed += 1;
                            info!(
                                operation = operations::GC,
                                payload = %payload_ref,
                                "removed orphaned payload"
                            );
                        }
                        Err(e) => warn!(
                            operation = operations::GC,
                            payload = %payload_ref,
                            error = %e,
                            "failed to remove orphaned payload"
                        ),
                    }
                }
            }
            Err(e) => warn!(
                operation = operations::GC,
                error = %e,
                "payload scan failed, skipping orphan sweep"
            ),
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexLayout;
    use crate::fingerprint::to_params;
    use serde::Deserialize;
    use serde_json::json;
    use std::cell::Cell;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        image: String,
        annotation: String,
    }

    fn load_records(params: &Params) -> Result<Vec<Record>, anyhow::Error> {
        let num_samples = params["num_samples"].as_u64().unwrap();
        let img_prefix = params["img_prefix"].as_str().unwrap();
        Ok((0..num_samples)
            .map(|i| Record {
                image: format!("{img_prefix}/{i}.jpg"),
                annotation: "data".to_string(),
            })
            .collect())
    }

    fn annotation_params() -> Params {
        to_params(&json!({
            "ann_file": "a.json",
            "num_samples": 3,
            "img_prefix": "/img",
        }))
        .unwrap()
    }

    fn make_cache(layout: IndexLayout) -> (TempDir, MemoCache) {
        let temp = TempDir::new().unwrap();
        let mut config = CacheConfig::at(temp.path().join("cache"));
        config.layout = layout;
        let cache = MemoCache::new(config).unwrap();
        (temp, cache)
    }

    fn layouts() -> [IndexLayout; 2] {
        [IndexLayout::Centralized, IndexLayout::Decentralized]
    }

    #[test]
    fn second_call_is_served_from_cache() {
        for layout in layouts() {
            let (_temp, cache) = make_cache(layout);
            let params = annotation_params();
            let calls = Cell::new(0u32);

            let first: Vec<Record> = cache
                .get_or_compute(&params, None, |p| {
                    calls.set(calls.get() + 1);
                    load_records(p)
                })
                .unwrap();
            assert_eq!(first.len(), 3);

            let second: Vec<Record> = cache
                .get_or_compute(&params, None, |p| {
                    calls.set(calls.get() + 1);
                    load_records(p)
                })
                .unwrap();

            assert_eq!(calls.get(), 1);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn report_reflects_miss_then_hit() {
        let (_temp, cache) = make_cache(IndexLayout::Decentralized);
        let params = annotation_params();

        let (_, miss) = cache
            .get_or_compute_with_report(&params, None, load_records)
            .unwrap();
        assert!(!miss.hit);
        assert!(miss.created);

        let (_, hit) = cache
            .get_or_compute_with_report(&params, None, load_records)
            .unwrap();
        assert!(hit.hit);
        assert!(!hit.created);
        assert_eq!(miss.key, hit.key);
        assert_eq!(miss.payload_ref, hit.payload_ref);
    }

    #[test]
    fn dangling_entry_recovers_by_recomputing() {
        for layout in layouts() {
            let (_temp, cache) = make_cache(layout);
            let params = annotation_params();
            let calls = Cell::new(0u32);

            let (_, report) = cache
                .get_or_compute_with_report(&params, None, |p| {
                    calls.set(calls.get() + 1);
                    load_records(p)
                })
                .unwrap();

            // Payload deleted out from under the index
            std::fs::remove_file(cache.store().resolve(&report.payload_ref)).unwrap();

            let (records, report) = cache
                .get_or_compute_with_report(&params, None, |p| {
                    calls.set(calls.get() + 1);
                    load_records(p)
                })
                .unwrap();

            assert_eq!(calls.get(), 2);
            assert_eq!(records.len(), 3);
            assert!(report.created);
            assert!(cache.store().exists(&report.payload_ref));
        }
    }

    #[test]
    fn corrupt_payload_recovers_by_recomputing() {
        let (_temp, cache) = make_cache(IndexLayout::Decentralized);
        let params = annotation_params();

        let (_, report) = cache
            .get_or_compute_with_report(&params, None, load_records)
            .unwrap();
        std::fs::write(cache.store().resolve(&report.payload_ref), b"not json").unwrap();

        let (records, report) = cache
            .get_or_compute_with_report(&params, None, load_records)
            .unwrap();
        assert_eq!(records.len(), 3);
        assert!(report.created);
    }

    #[test]
    fn code_fingerprint_change_invalidates() {
        for layout in layouts() {
            let (_temp, cache) = make_cache(layout);
            let params = annotation_params();
            let f1 = CodeFingerprint::from_version("v1");
            let f2 = CodeFingerprint::from_version("v2");

            let under_f1: Vec<Record> = cache
                .get_or_compute(&params, Some(&f1), |_| {
                    Ok::<_, anyhow::Error>(vec![Record {
                        image: "old".to_string(),
                        annotation: "old".to_string(),
                    }])
                })
                .unwrap();

            // New fingerprint must not see the old entry
            let under_f2: Vec<Record> = cache
                .get_or_compute(&params, Some(&f2), |_| {
                    Ok::<_, anyhow::Error>(vec![Record {
                        image: "new".to_string(),
                        annotation: "new".to_string(),
                    }])
                })
                .unwrap();
            assert_ne!(under_f1, under_f2);

            // Both entries persist independently
            assert_eq!(cache.index().list().unwrap().len(), 2);

            // And each fingerprint still hits its own entry
            let again: Vec<Record> = cache
                .get_or_compute(&params, Some(&f1), |_| -> Result<Vec<Record>, anyhow::Error> {
                    panic!("must not recompute under f1")
                })
                .unwrap();
            assert_eq!(again, under_f1);
        }
    }

    #[test]
    fn compute_error_propagates_unchanged() {
        let (_temp, cache) = make_cache(IndexLayout::Decentralized);
        let params = annotation_params();

        let err = cache
            .get_or_compute::<Vec<Record>, _, _>(&params, None, |_| {
                Err(anyhow::anyhow!("annotation file unreadable"))
            })
            .unwrap_err();

        match err {
            CacheError::Compute(e) => assert!(e.to_string().contains("unreadable")),
            other => panic!("expected compute error, got {other}"),
        }

        // Nothing was stored for the failed call
        assert_eq!(cache.index().list().unwrap().len(), 0);
    }

    #[test]
    fn entry_records_parameters_and_code_version() {
        let (_temp, cache) = make_cache(IndexLayout::Decentralized);
        let params = annotation_params();
        let code = CodeFingerprint::from_version("build-abc123");

        cache
            .get_or_compute::<Vec<Record>, anyhow::Error, _>(&params, Some(&code), load_records)
            .unwrap();

        let entries = cache.index().list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.parameters, params);
        assert_eq!(entries[0].1.code_version, "build-abc123");
    }

    #[test]
    fn stats_counts_entries_and_bytes() {
        let (_temp, cache) = make_cache(IndexLayout::Decentralized);

        for n in 1..=3u64 {
            let params = to_params(&json!({ "ann_file": format!("{n}.json") })).unwrap();
            cache
                .get_or_compute::<_, anyhow::Error, _>(&params, None, |_| Ok(vec![n; 4]))
                .unwrap();
        }

        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_entries, 3);
        assert!(stats.total_payload_bytes > 0);
    }

    #[test]
    fn gc_removes_dangling_entries_and_orphans() {
        for layout in layouts() {
            let (_temp, cache) = make_cache(layout);

            let params_a = to_params(&json!({ "ann_file": "a.json" })).unwrap();
            let params_b = to_params(&json!({ "ann_file": "b.json" })).unwrap();

            let (_, report_a) = cache
                .get_or_compute_with_report::<_, anyhow::Error, _>(&params_a, None, |_| Ok(1u32))
                .unwrap();
            cache
                .get_or_compute::<_, anyhow::Error, _>(&params_b, None, |_| Ok(2u32))
                .unwrap();

            // Dangle entry A by deleting its payload; orphan a payload by
            // dropping entry B from the index
            std::fs::remove_file(cache.store().resolve(&report_a.payload_ref)).unwrap();
            let key_b = compute_key(&params_b, None).unwrap();
            cache.index().remove(&key_b).unwrap();

            let report = cache.gc().unwrap();
            assert_eq!(report.dangling_entries_removed, 1);
            assert_eq!(report.orphaned_payloads_removed, 1);

            assert!(cache.index().list().unwrap().is_empty());
            assert!(cache.store().list_refs().unwrap().is_empty());
        }
    }

    #[test]
    fn gc_leaves_valid_entries_alone() {
        let (_temp, cache) = make_cache(IndexLayout::Decentralized);
        let params = annotation_params();

        cache
            .get_or_compute::<Vec<Record>, anyhow::Error, _>(&params, None, load_records)
            .unwrap();

        let report = cache.gc().unwrap();
        assert_eq!(report.dangling_entries_removed, 0);
        assert_eq!(report.orphaned_payloads_removed, 0);
        assert_eq!(cache.index().list().unwrap().len(), 1);
    }
}
