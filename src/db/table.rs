// src/db/table.rs

//! Generic SQLite table guarded by the per-file lock
//!
//! A [`TableSchema`] is a compile-time description of one table. A
//! [`LockedTable`] runs statements against it: take the file lock, open a
//! short-lived connection, run one statement, close, release.

use crate::db::lock::{FileLock, LockRegistry};
use crate::error::{Error, Result};
use rusqlite::{Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// SQLite storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }
}

/// One column of a table schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
    pub nullable: bool,
    pub unique: bool,
}

impl Column {
    pub const fn new(name: &'static str, kind: ColumnType) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            unique: false,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn definition(&self) -> String {
        let mut def = format!("{} {}", self.name, self.kind.as_sql());
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        if self.unique {
            def.push_str(" UNIQUE");
        }
        def
    }
}

/// Compile-time description of one table
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub unique_together: &'static [&'static str],
}

impl TableSchema {
    /// Idempotent `CREATE TABLE IF NOT EXISTS` statement
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(Column::definition).collect();
        if !self.unique_together.is_empty() {
            parts.push(format!("UNIQUE({})", self.unique_together.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            parts.join(", ")
        )
    }

    /// Comma separated column names, in schema order
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `?1, ?2, ...` for every column
    pub fn placeholders(&self) -> String {
        (1..=self.columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// True if a SQLite error is a constraint (e.g. UNIQUE) violation
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Open a connection to an existing database with the busy timeout set
pub fn connect(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if !db_path.exists() {
        return Err(Error::DatabaseNotFound(db_path.display().to_string()));
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

/// A table bound to one database file and that file's lock
#[derive(Debug, Clone)]
pub struct LockedTable {
    schema: &'static TableSchema,
    db_path: PathBuf,
    lock: Arc<FileLock>,
    lock_timeout: Duration,
    busy_timeout: Duration,
}

impl LockedTable {
    /// Bind `schema` to `db_path` and make sure the table exists
    pub fn new(
        schema: &'static TableSchema,
        db_path: &Path,
        registry: &LockRegistry,
        lock_timeout: Duration,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let table = Self {
            schema,
            db_path: db_path.to_path_buf(),
            lock: registry.lock_for(db_path),
            lock_timeout,
            busy_timeout,
        };
        table.create_table()?;
        Ok(table)
    }

    pub fn schema(&self) -> &'static TableSchema {
        self.schema
    }

    pub fn name(&self) -> &'static str {
        self.schema.name
    }

    /// Create the table if it does not exist yet
    pub fn create_table(&self) -> Result<()> {
        let sql = self.schema.create_sql();
        self.with_connection(|conn| {
            conn.execute(&sql, [])?;
            Ok(())
        })
    }

    /// Run `f` on a fresh connection while holding the file lock.
    ///
    /// The connection is closed before the lock is released.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let _guard = self.lock.acquire(self.lock_timeout)?;
        debug!("Acquired lock on {} for table {}", self.lock.path().display(), self.schema.name);
        let conn = connect(&self.db_path, self.busy_timeout)?;
        let result = f(&conn);
        drop(conn);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    static WIDGETS: TableSchema = TableSchema {
        name: "widgets",
        columns: &[
            Column::new("name", ColumnType::Text),
            Column::new("size", ColumnType::Integer),
            Column::new("weight", ColumnType::Real).nullable(),
            Column::new("serial", ColumnType::Text).unique(),
        ],
        unique_together: &["name", "size"],
    };

    fn widgets_table(temp: &TempDir) -> LockedTable {
        let db_path = temp.path().join("test.sqlite3");
        Connection::open(&db_path).unwrap();
        LockedTable::new(
            &WIDGETS,
            &db_path,
            &LockRegistry::new(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_create_sql() {
        assert_eq!(
            WIDGETS.create_sql(),
            "CREATE TABLE IF NOT EXISTS widgets (name TEXT NOT NULL, size INTEGER NOT NULL, \
             weight REAL, serial TEXT NOT NULL UNIQUE, UNIQUE(name, size))"
        );
        assert_eq!(WIDGETS.column_list(), "name, size, weight, serial");
        assert_eq!(WIDGETS.placeholders(), "?1, ?2, ?3, ?4");
    }

    #[test]
    fn test_create_table_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let table = widgets_table(&temp);
        table.create_table().unwrap();
        table.create_table().unwrap();

        let count: i64 = table
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='widgets'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unique_together_is_a_constraint_violation() {
        let temp = TempDir::new().unwrap();
        let table = widgets_table(&temp);

        let insert = |serial: &str| {
            table.with_connection(|conn| {
                conn.execute(
                    "INSERT INTO widgets (name, size, weight, serial) VALUES ('a', 1, NULL, ?1)",
                    [serial],
                )?;
                Ok(())
            })
        };

        insert("s1").unwrap();
        let err = insert("s2").unwrap_err();
        match err {
            Error::Database(e) => assert!(is_constraint_violation(&e)),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_database_file() {
        let temp = TempDir::new().unwrap();
        let result = connect(&temp.path().join("missing.sqlite3"), Duration::from_secs(1));
        assert!(matches!(result, Err(Error::DatabaseNotFound(_))));
    }
}
