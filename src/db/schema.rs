// src/db/schema.rs

//! Table schemas and schema version tracking for the cache index
//!
//! Both index tables are declared once here as [`TableSchema`] constants.
//! The same constants drive table creation, inserts and the migration
//! system that tracks which schema version a cache database carries.

use crate::db::table::{Column, ColumnType, TableSchema};
use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// One row per committed recipe revision
pub static RECIPES: TableSchema = TableSchema {
    name: "recipes",
    columns: &[
        Column::new("reference", ColumnType::Text),
        Column::new("rrev", ColumnType::Text),
        Column::new("path", ColumnType::Text).unique(),
        Column::new("timestamp", ColumnType::Real),
        Column::new("lru", ColumnType::Integer),
    ],
    unique_together: &["reference", "rrev"],
};

/// One row per committed package revision
pub static PACKAGES: TableSchema = TableSchema {
    name: "packages",
    columns: &[
        Column::new("reference", ColumnType::Text),
        Column::new("rrev", ColumnType::Text),
        Column::new("pkgid", ColumnType::Text),
        Column::new("prev", ColumnType::Text),
        Column::new("path", ColumnType::Text).unique(),
        Column::new("timestamp", ColumnType::Real),
        Column::new("build_id", ColumnType::Text).nullable(),
    ],
    unique_together: &["reference", "rrev", "pkgid", "prev"],
};

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Highest applied schema version, 0 for a fresh database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    ensure_version_table(conn)?;

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten();

    Ok(version.unwrap_or(0))
}

fn record_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Bring the index up to [`SCHEMA_VERSION`]; running it again is a no-op
pub fn migrate(conn: &Connection) -> Result<()> {
    let current = get_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(Error::InitError(format!(
            "Cache index has schema version {}, newer than supported {}",
            current, SCHEMA_VERSION
        )));
    }
    debug!("Cache index at schema version {}", current);

    for version in (current + 1)..=SCHEMA_VERSION {
        info!("Migrating cache index to schema version {}", version);
        apply_migration(conn, version)?;
        record_schema_version(conn, version)?;
    }

    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::InitError(format!(
            "Unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
///
/// Creates the two index tables plus lookup indexes on the identity
/// columns used by every query.
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(&format!(
        "
        {};
        {};
        CREATE INDEX IF NOT EXISTS idx_recipes_reference ON recipes(reference);
        CREATE INDEX IF NOT EXISTS idx_packages_recipe ON packages(reference, rrev);
        ",
        RECIPES.create_sql(),
        PACKAGES.create_sql(),
    ))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_schema_version_tracking() {
        let (_temp, conn) = create_test_db();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, 0);

        record_schema_version(&conn, 1).unwrap();
        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_migrate_creates_all_tables() {
        let (_temp, conn) = create_test_db();

        migrate(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"recipes".to_string()));
        assert!(tables.contains(&"packages".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let (_temp, conn) = create_test_db();

        migrate(&conn).unwrap();
        let version1 = get_schema_version(&conn).unwrap();

        migrate(&conn).unwrap();
        let version2 = get_schema_version(&conn).unwrap();

        assert_eq!(version1, version2);
        assert_eq!(version1, SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();
        record_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();

        assert!(matches!(migrate(&conn), Err(Error::InitError(_))));
    }

    #[test]
    fn test_unreadable_version_table_is_an_error() {
        let (_temp, conn) = create_test_db();
        conn.execute("CREATE TABLE schema_version (label TEXT)", []).unwrap();

        assert!(matches!(get_schema_version(&conn), Err(Error::Database(_))));
    }

    #[test]
    fn test_recipes_unique_revision() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        conn.execute(
            "INSERT INTO recipes (reference, rrev, path, timestamp, lru) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params!["zlib/1.2.11", "abc", "zlib_aaaa", 1.0, 1],
        )
        .unwrap();

        // Same reference and revision under another path
        let result = conn.execute(
            "INSERT INTO recipes (reference, rrev, path, timestamp, lru) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params!["zlib/1.2.11", "abc", "zlib_bbbb", 2.0, 2],
        );
        assert!(result.is_err());

        // Another revision reusing the path
        let result = conn.execute(
            "INSERT INTO recipes (reference, rrev, path, timestamp, lru) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params!["zlib/1.2.11", "def", "zlib_aaaa", 2.0, 2],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_packages_build_id_nullable() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        conn.execute(
            "INSERT INTO packages (reference, rrev, pkgid, prev, path, timestamp, build_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
            rusqlite::params!["zlib/1.2.11", "abc", "pkg1", "p1", "zlib_p1", 1.0],
        )
        .unwrap();

        let build_id: Option<String> = conn
            .query_row("SELECT build_id FROM packages", [], |row| row.get(0))
            .unwrap();
        assert!(build_id.is_none());
    }
}
