// src/db/lock.rs

//! Per-database-file mutual exclusion within one process
//!
//! Every table operation takes the lock of its database file for the
//! duration of a single statement. Waiting longer than the configured
//! timeout is an error, never a silent unsynchronized fallback.
//! Contention between processes is left to SQLite's own file locking.

use crate::error::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Held while a statement runs; dropping it releases the lock
pub type FileLockGuard<'a> = MutexGuard<'a, ()>;

/// A mutex whose acquisition gives up after a deadline
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    mutex: Mutex<()>,
}

impl FileLock {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            mutex: Mutex::new(()),
        }
    }

    /// Canonical path of the database file this lock protects
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is free or `timeout` elapses
    pub fn acquire(&self, timeout: Duration) -> Result<FileLockGuard<'_>> {
        self.mutex.try_lock_for(timeout).ok_or_else(|| Error::LockTimeout {
            path: self.path.clone(),
            timeout,
        })
    }
}

/// Maps canonical database paths to their locks
///
/// Cloning shares the underlying map, so every clone hands out the same
/// lock for the same file.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<FileLock>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `db_path`, created on first use
    pub fn lock_for(&self, db_path: &Path) -> Arc<FileLock> {
        let key = canonical_db_path(db_path);
        let mut locks = self.locks.lock();
        locks
            .entry(key.clone())
            .or_insert_with(|| {
                debug!("Registering database lock for {}", key.display());
                Arc::new(FileLock::new(key))
            })
            .clone()
    }

    /// Number of distinct database files with a registered lock
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The database file may not exist yet, so fall back to canonicalizing
/// its parent folder.
fn canonical_db_path(db_path: &Path) -> PathBuf {
    if let Ok(path) = fs::canonicalize(db_path) {
        return path;
    }
    match (db_path.parent(), db_path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| db_path.to_path_buf()),
        _ => db_path.to_path_buf(),
    }
}
