//! Structured logging utilities.
//!
//! All cache logs carry structured fields so hits, misses, and degraded
//! reads can be filtered and counted downstream.
//!
//! # Log Format Conventions
//!
//! - `operation`: the operation being performed ("get", "put", "gc")
//! - `status`: the result status ("hit", "miss", "dangling", "created")
//! - `key`: cache key (hex-encoded)
//! - `payload`: payload reference relative to the cache directory
//! - `size_bytes`: size in bytes

use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI/production)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (ANNOCACHE_LOG_FORMAT)
    pub fn from_env() -> Self {
        match std::env::var("ANNOCACHE_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => {
                // Default: pretty for dev, compact for CI
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            }
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// # Environment Variables
///
/// - `RUST_LOG`: set log level (e.g., "debug", "info", "warn")
/// - `ANNOCACHE_LOG_FORMAT`: set format ("pretty", "compact", "json")
/// - `CI`: if set, defaults to compact format
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    match LogFormat::from_env() {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_writer(io::stderr),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(false)
                        .with_writer(io::stderr)
                        .json(),
                )
                .init();
        }
    }
}

/// Operation names for consistent logging
pub mod operations {
    pub const GET: &str = "get";
    pub const PUT: &str = "put";
    pub const GC: &str = "gc";
}

/// Status values for consistent logging
pub mod status {
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const DANGLING: &str = "dangling";
    pub const CREATED: &str = "created";
    pub const ERROR: &str = "error";
}
