// src/config.rs

//! Cache configuration
//!
//! Everything has a default; environment variables can override the cache
//! location and the lock timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default name of the index database inside the base folder
pub const DEFAULT_DB_FILENAME: &str = "cache.sqlite3";

/// How long a thread may wait for the per-database lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite busy timeout for cross-process contention
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the package cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root folder holding every cache entry and the index database
    pub base_folder: PathBuf,
    /// Database file name, relative to `base_folder`
    pub db_filename: String,
    /// Maximum wait for the in-process database lock
    pub lock_timeout: Duration,
    /// SQLite busy timeout applied to every connection
    pub busy_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            base_folder: home.join(".conan2").join("p"),
            db_filename: DEFAULT_DB_FILENAME.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl CacheConfig {
    /// Configuration rooted at an explicit base folder
    pub fn new(base_folder: impl Into<PathBuf>) -> Self {
        Self {
            base_folder: base_folder.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `CONAN_HOME`, `CONAN_CACHE_STORAGE` and
    /// `CONAN_CACHE_LOCK_TIMEOUT` (seconds)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(home) = std::env::var("CONAN_HOME") {
            config.base_folder = Path::new(&home).join("p");
        }
        if let Ok(storage) = std::env::var("CONAN_CACHE_STORAGE") {
            config.base_folder = PathBuf::from(storage);
        }
        if let Some(secs) = std::env::var("CONAN_CACHE_LOCK_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.lock_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Absolute path of the index database
    pub fn db_path(&self) -> PathBuf {
        self.base_folder.join(&self.db_filename)
    }
}
