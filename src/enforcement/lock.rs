// src/enforcement/lock.rs
//!
//! The single named lock guarding OS enforcement state.
//!
//! On Unix this is an exclusive `flock` on `<state_dir>/openpath.lock`. Each
//! acquisition opens its own file description, so the lock excludes both
//! separate processes and concurrent tasks inside the daemon.

use crate::error::Result;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct EnforcementLock {
    path: PathBuf,
}

/// Held lock; released on drop.
pub struct LockGuard {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    path: PathBuf,
    #[cfg(not(unix))]
    _file: File,
}

impl EnforcementLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Non-blocking acquire; `Ok(None)` means another cycle holds the lock.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.try_lock_file()
    }

    /// Retries until `wait` elapses. Only for latency-tolerant callers.
    pub async fn acquire_within(&self, wait: Duration) -> Result<Option<LockGuard>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(Some(guard));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    #[cfg(unix)]
    fn try_lock_file(&self) -> Result<Option<LockGuard>> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(LockGuard { _flock: flock })),
            Err((_, Errno::EWOULDBLOCK)) => Ok(None),
            Err((_, errno)) => Err(std::io::Error::from(errno).into()),
        }
    }

    #[cfg(not(unix))]
    fn try_lock_file(&self) -> Result<Option<LockGuard>> {
        use std::io::Write;

        // A lock file left behind by a crashed process expires.
        const STALE_AFTER: Duration = Duration::from_secs(600);
        if let Ok(meta) = fs::metadata(&self.path)
            && let Ok(modified) = meta.modified()
            && modified.elapsed().map(|age| age > STALE_AFTER).unwrap_or(false)
        {
            log::warn!("Removing stale lock {}", self.path.display());
            let _ = fs::remove_file(&self.path);
        }

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                let _ = writeln!(file, "pid={}", std::process::id());
                Ok(Some(LockGuard {
                    path: self.path.clone(),
                    _file: file,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(not(unix))]
impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
