// src/db/recipes.rs

//! The `recipes` table: one row per committed recipe revision

use crate::db::lock::LockRegistry;
use crate::db::models::RecipeRow;
use crate::db::schema::RECIPES;
use crate::db::table::{LockedTable, is_constraint_violation};
use crate::error::{Error, Result};
use crate::reference::RecipeReference;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const SELECT_COLUMNS: &str = "reference, rrev, path, timestamp, lru";

fn require_revision(reference: &RecipeReference) -> Result<&str> {
    reference.revision.as_deref().ok_or_else(|| {
        Error::InvalidState(format!(
            "Recipe revision of '{}' must be known",
            reference
        ))
    })
}

/// Typed access to the `recipes` table
#[derive(Debug, Clone)]
pub struct RecipesTable {
    table: LockedTable,
}

impl RecipesTable {
    pub fn new(
        db_path: &Path,
        registry: &LockRegistry,
        lock_timeout: Duration,
        busy_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            table: LockedTable::new(&RECIPES, db_path, registry, lock_timeout, busy_timeout)?,
        })
    }

    /// Insert a committed revision. Fails with `AlreadyExists` if the
    /// `(reference, rrev)` pair (or the path) is already registered.
    pub fn create(&self, path: &str, reference: &RecipeReference) -> Result<()> {
        let rrev = require_revision(reference)?;
        let timestamp = reference.timestamp.ok_or_else(|| {
            Error::InvalidState(format!("Recipe '{}' has no timestamp", reference.repr()))
        })?;
        let lru = Utc::now().timestamp();

        debug!("Registering recipe {} at {}", reference.repr(), path);
        self.table.with_connection(|conn| {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                RECIPES.name,
                RECIPES.column_list(),
                RECIPES.placeholders()
            );
            match conn.execute(
                &sql,
                params![reference.to_string(), rrev, path, timestamp, lru],
            ) {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists(format!(
                    "Reference '{}' already exists",
                    reference.repr()
                ))),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Set the row's timestamp to the reference's timestamp
    pub fn update_timestamp(&self, reference: &RecipeReference) -> Result<()> {
        let rrev = require_revision(reference)?;
        let timestamp = reference.timestamp.ok_or_else(|| {
            Error::InvalidState(format!("Recipe '{}' has no timestamp", reference.repr()))
        })?;

        let updated = self.table.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE recipes SET timestamp = ?1 WHERE reference = ?2 AND rrev = ?3",
                params![timestamp, reference.to_string(), rrev],
            )?)
        })?;

        if updated == 0 {
            return Err(not_found(reference));
        }
        Ok(())
    }

    /// Mark the revision as used now
    pub fn update_lru(&self, reference: &RecipeReference) -> Result<()> {
        let rrev = require_revision(reference)?;
        let lru = Utc::now().timestamp();

        let updated = self.table.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE recipes SET lru = ?1 WHERE reference = ?2 AND rrev = ?3",
                params![lru, reference.to_string(), rrev],
            )?)
        })?;

        if updated == 0 {
            return Err(not_found(reference));
        }
        Ok(())
    }

    /// Delete the exact revision, or every revision if the reference has none
    pub fn remove(&self, reference: &RecipeReference) -> Result<usize> {
        self.table.with_connection(|conn| {
            let removed = match &reference.revision {
                Some(rrev) => conn.execute(
                    "DELETE FROM recipes WHERE reference = ?1 AND rrev = ?2",
                    params![reference.to_string(), rrev],
                )?,
                None => conn.execute(
                    "DELETE FROM recipes WHERE reference = ?1",
                    params![reference.to_string()],
                )?,
            };
            debug!("Removed {} recipe row(s) for {}", removed, reference.repr_notime());
            Ok(removed)
        })
    }

    /// Every distinct reference, without revision
    pub fn all_references(&self) -> Result<Vec<RecipeReference>> {
        let texts: Vec<String> = self.table.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT reference FROM recipes")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        texts.iter().map(|t| RecipeReference::loads(t)).collect()
    }

    /// The exact revision's row
    pub fn get(&self, reference: &RecipeReference) -> Result<RecipeRow> {
        let rrev = require_revision(reference)?;
        let row = self.table.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM recipes WHERE reference = ?1 AND rrev = ?2",
                SELECT_COLUMNS
            );
            Ok(conn
                .query_row(&sql, params![reference.to_string(), rrev], RecipeRow::from_row)
                .optional()?)
        })?;

        row.ok_or_else(|| not_found(reference))
    }

    /// The most recently committed or touched revision. Ties on timestamp
    /// resolve to the greater revision string.
    pub fn get_latest(&self, reference: &RecipeReference) -> Result<RecipeRow> {
        let row = self.table.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM recipes WHERE reference = ?1 \
                 ORDER BY timestamp DESC, rrev DESC LIMIT 1",
                SELECT_COLUMNS
            );
            Ok(conn
                .query_row(&sql, params![reference.to_string()], RecipeRow::from_row)
                .optional()?)
        })?;

        row.ok_or_else(|| not_found(&reference.without_revision()))
    }

    /// All revisions of a reference, most recent first
    pub fn get_revisions(&self, reference: &RecipeReference) -> Result<Vec<RecipeRow>> {
        self.table.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM recipes WHERE reference = ?1 \
                 ORDER BY timestamp DESC, rrev DESC",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![reference.to_string()], RecipeRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Revisions whose last use is before `cutoff` (epoch seconds), least
    /// recently used first
    pub fn get_lru_older_than(&self, cutoff: i64) -> Result<Vec<RecipeRow>> {
        self.table.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM recipes WHERE lru < ?1 ORDER BY lru ASC",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![cutoff], RecipeRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn not_found(reference: &RecipeReference) -> Error {
    Error::DoesNotExist(format!("Recipe '{}' not found", reference.repr_notime()))
}
