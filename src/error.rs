// src/error.rs

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Core error types for the Conan cache
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// No index row for the requested identity
    #[error("{0}")]
    DoesNotExist(String),

    /// Insert collided with an existing index row
    #[error("{0}")]
    AlreadyExists(String),

    /// The per-database lock could not be acquired in time
    #[error("Failed to acquire database lock for {} within {:?}", .path.display(), .timeout)]
    LockTimeout { path: PathBuf, timeout: Duration },

    /// An index row points at a folder that is gone from disk
    #[error("Cache entry '{reference}' is registered at {} but the folder is missing", .path.display())]
    DanglingEntry { reference: String, path: PathBuf },

    /// Recomputed manifests differ from the ones recorded at commit
    #[error("Cache integrity check failed:\n{}", .0.join("\n"))]
    IntegrityMismatch(Vec<String>),

    /// Malformed recipe or package reference
    #[error("{0}")]
    InvalidReference(String),

    /// A caller broke an operation precondition
    #[error("Invalid cache operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// True for lookups of identities the index does not know
    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Error::DoesNotExist(_))
    }

    /// True for inserts that hit a uniqueness constraint
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }
}

/// Result type alias using the cache's Error type
pub type Result<T> = std::result::Result<T, Error>;
