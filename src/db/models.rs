// src/db/models.rs

//! Typed rows of the cache index
//!
//! Each struct mirrors one table of [`crate::db::schema`], column for
//! column, and is built from a row selected in schema order.

use crate::reference::{PkgReference, RecipeReference};
use rusqlite::Row;

/// A committed recipe revision
#[derive(Debug, Clone)]
pub struct RecipeRow {
    /// Reference with revision and timestamp filled in
    pub reference: RecipeReference,
    /// Folder relative to the cache base folder
    pub path: String,
    /// Last time (epoch seconds) the recipe was used
    pub lru: i64,
}

impl RecipeRow {
    /// Convert a `reference, rrev, path, timestamp, lru` row
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let reference: String = row.get(0)?;
        let reference = parse_reference(0, &reference)?;

        Ok(Self {
            reference: RecipeReference {
                revision: Some(row.get(1)?),
                timestamp: Some(row.get(3)?),
                ..reference
            },
            path: row.get(2)?,
            lru: row.get(4)?,
        })
    }
}

/// A committed package revision
#[derive(Debug, Clone)]
pub struct PackageRow {
    /// Package reference with recipe revision, package revision and
    /// timestamp filled in
    pub pref: PkgReference,
    /// Folder relative to the cache base folder
    pub path: String,
    /// Build that produced this package, if it may be reused
    pub build_id: Option<String>,
}

impl PackageRow {
    /// Convert a `reference, rrev, pkgid, prev, path, timestamp, build_id` row
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let reference: String = row.get(0)?;
        let reference = parse_reference(0, &reference)?;

        let recipe = RecipeReference {
            revision: Some(row.get(1)?),
            ..reference
        };

        Ok(Self {
            pref: PkgReference {
                recipe,
                package_id: row.get(2)?,
                revision: Some(row.get(3)?),
                timestamp: Some(row.get(5)?),
            },
            path: row.get(4)?,
            build_id: row.get(6)?,
        })
    }
}

fn parse_reference(column: usize, text: &str) -> rusqlite::Result<RecipeReference> {
    RecipeReference::loads(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            )),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use rusqlite::{Connection, params};

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_recipe_row_from_row() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO recipes (reference, rrev, path, timestamp, lru) VALUES (?1, ?2, ?3, ?4, ?5)",
            params!["zlib/1.2.11@conan/stable", "abc", "zlib_0123456789abc", 10.5, 42],
        )
        .unwrap();

        let row = conn
            .query_row(
                "SELECT reference, rrev, path, timestamp, lru FROM recipes",
                [],
                RecipeRow::from_row,
            )
            .unwrap();

        assert_eq!(row.reference.repr(), "zlib/1.2.11@conan/stable#abc%10.5");
        assert_eq!(row.path, "zlib_0123456789abc");
        assert_eq!(row.lru, 42);
    }

    #[test]
    fn test_package_row_from_row() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO packages (reference, rrev, pkgid, prev, path, timestamp, build_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params!["zlib/1.2.11", "abc", "pid", "p1", "zlib_p", 3.0, "combo"],
        )
        .unwrap();

        let row = conn
            .query_row(
                "SELECT reference, rrev, pkgid, prev, path, timestamp, build_id FROM packages",
                [],
                PackageRow::from_row,
            )
            .unwrap();

        assert_eq!(row.pref.repr(), "zlib/1.2.11#abc:pid#p1%3.0");
        assert_eq!(row.build_id.as_deref(), Some("combo"));
    }

    #[test]
    fn test_corrupt_reference_is_a_conversion_error() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO recipes (reference, rrev, path, timestamp, lru) VALUES ('garbage', 'r', 'p', 1.0, 1)",
            [],
        )
        .unwrap();

        let result = conn.query_row(
            "SELECT reference, rrev, path, timestamp, lru FROM recipes",
            [],
            RecipeRow::from_row,
        );
        assert!(matches!(
            result,
            Err(rusqlite::Error::FromSqlConversionFailure(0, _, _))
        ));
    }
}
