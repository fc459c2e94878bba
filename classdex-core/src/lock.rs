//! Cross-process build lock.
//!
//! The lock is a file next to the cache. Its existence means a rebuild is
//! in progress and its mtime is the lease clock: a lock older than the
//! configured maximum is presumed abandoned and may be removed by anyone.

use crate::cache::{file_age, CACHE_VERSION};
use crate::ClassdexError;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Distinguishes stale-lock claims made by threads of one process
static CLAIMS: AtomicUsize = AtomicUsize::new(0);

/// Handle on the lock file for one cache identity
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

/// Result of waiting behind another process's rebuild
#[derive(Debug)]
pub enum WaitOutcome {
    /// The cache file appeared; read it instead of scanning
    CacheReady,
    /// The previous holder vanished or went stale and the lock is now ours
    Acquired(LockGuard),
}

/// An owned lock. Dropping it removes the lock file.
#[derive(Debug)]
pub struct LockGuard {
    lock: LockFile,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.lock.path
    }

    /// Remove the lock file now
    pub fn release(mut self) {
        self.lock.release();
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.lock.release();
        }
    }
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.path.exists()
    }

    /// Age of the current lock, or `None` when nobody holds it
    pub fn age(&self) -> Option<Duration> {
        file_age(&self.path)
    }

    /// Create the lock file if absent.
    ///
    /// Returns `None` when another process already holds it.
    pub fn try_acquire(&self) -> crate::Result<Option<LockGuard>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // The body is informational only; a failed write still leaves a valid lock.
        let _ = file.write_all(lock_text().as_bytes());

        debug!(path = %self.path.display(), "acquired lock");
        Ok(Some(LockGuard {
            lock: self.clone(),
            released: false,
        }))
    }

    /// Block until `cache_path` exists, taking the lock over if it goes stale.
    ///
    /// Polls every `poll_interval`. A lock older than `max_lock_age` is
    /// deleted and re-acquired. Gives up with `LockTimeout` once
    /// `max_wait` has passed without the cache appearing.
    pub fn wait_or_takeover(
        &self,
        cache_path: &Path,
        max_wait: Duration,
        max_lock_age: Duration,
        poll_interval: Duration,
    ) -> crate::Result<WaitOutcome> {
        let start = Instant::now();

        loop {
            if cache_path.exists() {
                debug!(waited = ?start.elapsed(), "cache appeared while waiting");
                return Ok(WaitOutcome::CacheReady);
            }

            match self.age() {
                None => {
                    debug!(path = %self.path.display(), "lock released without a cache");
                    if let Some(guard) = self.try_acquire()? {
                        return Ok(WaitOutcome::Acquired(guard));
                    }
                }
                Some(age) if age > max_lock_age => {
                    warn!(
                        path = %self.path.display(),
                        age_secs = age.as_secs(),
                        "lock file is stale, taking over"
                    );
                    self.break_stale(max_lock_age);
                    if let Some(guard) = self.try_acquire()? {
                        return Ok(WaitOutcome::Acquired(guard));
                    }
                }
                Some(_) => {}
            }

            let waited = start.elapsed();
            if waited >= max_wait {
                return Err(ClassdexError::LockTimeout { waited });
            }

            debug!("waiting for cache file to complete");
            thread::sleep(poll_interval.min(max_wait - waited));
        }
    }

    /// Remove the lock if it is older than `max_lock_age`.
    ///
    /// The lock is first renamed to a name private to this call and its
    /// age checked again there. If another process replaced it with a fresh
    /// lock in the meantime, that lock is linked back into place untouched.
    /// Returns whether a stale lock was removed.
    pub fn break_stale(&self, max_lock_age: Duration) -> bool {
        let mut claimed = self.path.clone().into_os_string();
        claimed.push(format!(
            ".stale.{}.{}",
            std::process::id(),
            CLAIMS.fetch_add(1, Ordering::Relaxed)
        ));
        let claimed = PathBuf::from(claimed);

        match fs::rename(&self.path, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return false,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not claim stale lock");
                return false;
            }
        }

        let stale = file_age(&claimed).map_or(true, |age| age > max_lock_age);
        if !stale {
            debug!(path = %self.path.display(), "lock was renewed, putting it back");
            if let Err(e) = fs::hard_link(&claimed, &self.path) {
                debug!(error = %e, "lock was replaced again before it could be restored");
            }
        }

        if let Err(e) = fs::remove_file(&claimed) {
            warn!(path = %claimed.display(), error = %e, "could not remove claimed lock");
        }
        stale
    }

    /// Delete the lock file. Missing files are fine.
    pub fn release(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed lock file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove lock file"),
        }
    }
}

fn lock_text() -> String {
    let date = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    format!(
        "classdex\n\nVersion: {}\nPID:     {}\nDate:    {}\n",
        CACHE_VERSION,
        std::process::id(),
        date
    )
}
