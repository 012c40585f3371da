//! Advisory cache lock.
//!
//! The miss write sequence (payload write, then index insert) runs under an
//! exclusive advisory lock so two writers on the same cache directory do not
//! interleave index updates. Contention is retried until a timeout and
//! logged as a warning. Lookups never take the lock.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

/// Lock file name within the cache directory.
const LOCK_FILE: &str = ".lock";

/// Poll interval while waiting for a contended lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive advisory lock over a cache directory, released on drop.
///
/// The holder's PID is written into the lock file for diagnostics.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    /// Acquire the lock, waiting up to `timeout` for a contending holder.
    ///
    /// Returns `ErrorKind::TimedOut` if the holder does not release in time.
    pub fn acquire(cache_dir: &Path, timeout: Duration) -> io::Result<Self> {
        let path = cache_dir.join(LOCK_FILE);
        let started = Instant::now();
        let mut warned = false;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if !warned {
                        warn!(lock = %path.display(), "cache lock contended, waiting");
                        warned = true;
                    }
                    if started.elapsed() >= timeout {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("timed out waiting for cache lock {}", path.display()),
                        ));
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
