// src/db/mod.rs

//! Database layer for the package cache
//!
//! This module handles all SQLite operations including:
//! - Database initialization and schema migration
//! - Per-file locking around single statements
//! - The `recipes` and `packages` tables and the [`CacheDatabase`] facade

pub mod index;
pub mod lock;
pub mod models;
pub mod packages;
pub mod recipes;
pub mod schema;
pub mod table;

pub use index::CacheDatabase;
pub use lock::LockRegistry;
pub use models::{PackageRow, RecipeRow};

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Initialize the cache database at the specified path
///
/// Creates the database file and brings the schema up to date.
/// This is idempotent - calling it on an existing database is safe.
pub fn init(db_path: &Path, busy_timeout: Duration) -> Result<()> {
    debug!("Initializing database at: {}", db_path.display());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)?;

    // journal_mode returns a row, so it cannot go through execute()
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    debug!("Journal mode: {}", mode);

    schema::migrate(&conn)?;

    info!("Cache database ready at {}", db_path.display());
    Ok(())
}

/// Open an existing cache database
pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    table::connect(db_path, busy_timeout)
}
