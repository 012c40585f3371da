//! Error types for cache operations.
//!
//! Read-side faults are fail-safe: a missing or corrupt payload, or an
//! unreadable index document, degrades to a cache miss in the controller.
//! Only parameter fingerprinting and the caller's compute function can fail
//! a cached call outright.

use std::path::PathBuf;

/// Parameters could not be reduced to a canonical textual form.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// The parameter value failed to serialize.
    #[error("parameters are not serializable: {source}")]
    Unserializable {
        /// The underlying serialization error.
        source: serde_json::Error,
    },

    /// The parameters serialized to something other than a map of named values.
    #[error("parameters must serialize to a map of named values")]
    NotAMap,
}

/// A source unit needed for the code fingerprint could not be retrieved.
///
/// Callers that can tolerate this fall back to
/// [`CodeFingerprint::unknown`](crate::fingerprint::CodeFingerprint::unknown)
/// instead of aborting the load.
#[derive(Debug, thiserror::Error)]
#[error("source unavailable at {path}: {source}")]
pub struct SourceUnavailableError {
    /// The source file that could not be read.
    pub path: PathBuf,
    /// The underlying I/O error.
    pub source: std::io::Error,
}

/// Payload store failures.
///
/// `NotFound` and `Corrupt` are recoverable: the controller converts them
/// into a miss and recomputes. The other variants fail the miss write.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No payload object exists at the referenced location.
    #[error("payload not found at {path}")]
    NotFound {
        /// The resolved payload path.
        path: PathBuf,
    },

    /// The payload exists but does not deserialize.
    #[error("payload at {path} is corrupt: {reason}")]
    Corrupt {
        /// The resolved payload path.
        path: PathBuf,
        /// Description of the decode failure.
        reason: String,
    },

    /// An I/O error occurred while reading or writing a payload.
    #[error("payload store I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The computed value failed to serialize for storage.
    #[error("failed to serialize payload: {source}")]
    Encode {
        /// The underlying serialization error.
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Whether the controller may treat this failure as a plain miss.
    pub fn is_miss(&self) -> bool {
        matches!(self, StoreError::NotFound { .. } | StoreError::Corrupt { .. })
    }
}

/// Index document failures.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// An I/O error occurred while reading or writing an index document.
    #[error("index I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An index document could not be parsed.
    #[error("failed to parse index document {path}: {reason}")]
    Parse {
        /// The document path.
        path: PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// An entry failed to serialize into its document.
    #[error("failed to serialize index entry: {source}")]
    Encode {
        /// The underlying serialization error.
        source: serde_json::Error,
    },

    /// The cache lock could not be acquired for the miss write sequence.
    #[error("could not acquire cache lock at {path}: {source}")]
    Lock {
        /// The cache directory the lock guards.
        path: PathBuf,
        /// The underlying I/O error (`TimedOut` on contention timeout).
        source: std::io::Error,
    },
}

/// Controller-level error for a cached call.
///
/// `Compute` carries the caller's error unchanged; the controller never
/// retries or masks a genuine compute failure.
#[derive(Debug, thiserror::Error)]
pub enum CacheError<E> {
    /// Key derivation failed.
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    /// The index could not be updated during a miss write.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// The payload could not be stored during a miss write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The compute function failed.
    #[error("compute failed: {0}")]
    Compute(E),
}
