// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sibling-file locks for shared-file updates.
//!
//! An update to `<path>` stages its new content in `<path>.lock`, acquired
//! by exclusive create. `commit()` renames the lock over the target;
//! `rollback()` or `Drop` unlinks it. There is no exit-handler registry:
//! the guard owns cleanup.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

/// How long `acquire` spins on a held lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

const SPIN_STEP: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("unable to create lock file {0:?}: held by another process")]
    Held(PathBuf),

    #[error("lock file I/O on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An exclusively held `<path>.lock` staging file.
#[derive(Debug)]
pub struct Lockfile {
    target: PathBuf,
    lock_path: PathBuf,
    file: Option<File>,
}

impl Lockfile {
    /// Acquire `<target>.lock`, spinning up to `timeout` if another process
    /// holds it.
    pub fn acquire(target: &Path, timeout: Duration) -> Result<Lockfile, LockError> {
        let lock_path = lock_path_for(target);
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(file) => {
                    return Ok(Lockfile {
                        target: target.to_path_buf(),
                        lock_path,
                        file: Some(file),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(LockError::Held(lock_path));
                    }
                    std::thread::sleep(SPIN_STEP);
                }
                Err(source) => {
                    return Err(LockError::Io { path: lock_path, source });
                }
            }
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically publish the staged content over the target.
    pub fn commit(mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|source| LockError::Io {
                path: self.lock_path.clone(),
                source,
            })?;
        }
        std::fs::rename(&self.lock_path, &self.target).map_err(|source| LockError::Io {
            path: self.lock_path.clone(),
            source,
        })?;
        // Rename consumed the lock file; nothing left for Drop.
        self.lock_path.clear();
        Ok(())
    }

    /// Discard the staged content and release the lock.
    pub fn rollback(self) {
        // Drop does the unlink.
    }
}

impl Write for Lockfile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.write(buf),
            None => Err(io::Error::other("lock file already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        self.file.take();
        if !self.lock_path.as_os_str().is_empty() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut os = target.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

#[cfg(test)]
#[path = "lockfile_tests.rs"]
mod tests;
