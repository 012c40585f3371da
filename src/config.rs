//! Cache configuration.
//!
//! Configuration is explicit: a [`CacheConfig`] value is handed to the
//! controller at construction time. Tools that want file-based
//! configuration can load the same shape from a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How index entries are laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexLayout {
    /// One shared `index.json` document holding every entry.
    Centralized,

    /// One document per entry under `entries/`, named by cache key.
    #[default]
    Decentralized,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root cache directory.
    pub dir: PathBuf,

    /// Index document layout.
    #[serde(default)]
    pub layout: IndexLayout,

    /// Seconds to wait for the cache lock before giving up.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_lock_timeout_secs() -> u64 {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cache"),
            layout: IndexLayout::default(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl CacheConfig {
    /// Configuration rooted at the given directory, defaults elsewhere.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Configuration file failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this shape.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying TOML error.
        source: toml::de::Error,
    },
}
