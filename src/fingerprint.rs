//! Cache key derivation.
//!
//! Keys are content-addressed: a SHA-256 digest over a canonical encoding of
//! the call parameters, optionally combined with a fingerprint of the source
//! code that interprets them. Identical logical inputs always hash to the
//! same key, across processes and platforms; any difference in parameters or
//! code fingerprint changes the key.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::error::{FingerprintError, SourceUnavailableError};

/// Sentinel recorded when a code fingerprint could not be derived.
const UNKNOWN_VERSION: &str = "unknown-version";

/// Named parameters of a cached operation.
pub type Params = serde_json::Map<String, Value>;

/// A 256-bit content-addressed cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding, used for file names and index documents.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a key from its hex encoding.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let digest: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(digest))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Fingerprint of the source code a cached result depends on.
///
/// When the interpreting logic changes, previously cached results become
/// unreachable under new keys instead of being served stale. The sentinel
/// from [`CodeFingerprint::unknown`] stands in when no fingerprint can be
/// derived; it is not a valid hex digest, so it never collides with a real
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFingerprint(String);

impl CodeFingerprint {
    /// Wrap an explicit version string, e.g. a release tag or a build-time
    /// content hash of the interpreting module.
    pub fn from_version(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Sentinel for "fingerprint derivation was attempted and failed".
    pub fn unknown() -> Self {
        Self(UNKNOWN_VERSION.to_string())
    }

    /// Whether this is the unknown-version sentinel.
    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_VERSION
    }

    /// The fingerprint as a string, as recorded in index entries.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CodeFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of source text contributing to a code fingerprint.
#[derive(Debug, Clone)]
pub enum SourceUnit {
    /// Source text provided inline.
    Text(String),
    /// Source text read from a file at fingerprint time.
    File(PathBuf),
}

/// Hash the given source units, in order, into a code fingerprint.
///
/// Fails if any file unit cannot be read; callers that can tolerate the
/// failure should fall back to [`CodeFingerprint::unknown`] rather than
/// aborting the load.
pub fn compute_code_fingerprint(
    units: &[SourceUnit],
) -> Result<CodeFingerprint, SourceUnavailableError> {
    let mut hasher = Sha256::new();

    for unit in units {
        match unit {
            SourceUnit::Text(text) => hasher.update(text.as_bytes()),
            SourceUnit::File(path) => {
                let text = fs::read_to_string(path).map_err(|source| SourceUnavailableError {
                    path: path.clone(),
                    source,
                })?;
                hasher.update(text.as_bytes());
            }
        }
    }

    Ok(CodeFingerprint(hex::encode(hasher.finalize())))
}

/// Convert any serializable value into a parameter map.
///
/// Fails if the value does not serialize, or serializes to something other
/// than a map of named values.
pub fn to_params<P: Serialize>(params: &P) -> Result<Params, FingerprintError> {
    match serde_json::to_value(params) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(FingerprintError::NotAMap),
        Err(source) => Err(FingerprintError::Unserializable { source }),
    }
}

/// Derive the cache key for a parameter map and optional code fingerprint.
pub fn compute_key(
    params: &Params,
    code: Option<&CodeFingerprint>,
) -> Result<CacheKey, FingerprintError> {
    let canonical = canonical_encoding(params)?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    if let Some(code) = code {
        hasher.update(b"\n");
        hasher.update(code.as_str().as_bytes());
    }

    Ok(CacheKey(hasher.finalize().into()))
}

/// Canonical textual form of a parameter map: keys sorted at every nesting
/// level, stable JSON formatting.
fn canonical_encoding(params: &Params) -> Result<String, FingerprintError> {
    let canonical = canonicalize(&Value::Object(params.clone()));
    serde_json::to_string(&canonical).map_err(|source| FingerprintError::Unserializable { source })
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
