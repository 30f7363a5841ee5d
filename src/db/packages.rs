// src/db/packages.rs

//! The `packages` table: one row per committed package revision

use crate::db::lock::LockRegistry;
use crate::db::models::PackageRow;
use crate::db::schema::PACKAGES;
use crate::db::table::{LockedTable, is_constraint_violation};
use crate::error::{Error, Result};
use crate::reference::{PkgReference, RecipeReference};
use rusqlite::{OptionalExtension, params};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const SELECT_COLUMNS: &str = "reference, rrev, pkgid, prev, path, timestamp, build_id";

fn require_recipe_revision(reference: &RecipeReference) -> Result<&str> {
    reference.revision.as_deref().ok_or_else(|| {
        Error::InvalidState(format!(
            "Recipe revision of '{}' must be known to query its packages",
            reference
        ))
    })
}

fn require_package_revision(pref: &PkgReference) -> Result<&str> {
    pref.revision.as_deref().ok_or_else(|| {
        Error::InvalidState(format!("Package revision of '{}' must be known", pref))
    })
}

/// Typed access to the `packages` table
#[derive(Debug, Clone)]
pub struct PackagesTable {
    table: LockedTable,
}

impl PackagesTable {
    pub fn new(
        db_path: &Path,
        registry: &LockRegistry,
        lock_timeout: Duration,
        busy_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            table: LockedTable::new(&PACKAGES, db_path, registry, lock_timeout, busy_timeout)?,
        })
    }

    /// Insert a committed package revision. Fails with `AlreadyExists` on a
    /// uniqueness collision.
    pub fn create(&self, path: &str, pref: &PkgReference, build_id: Option<&str>) -> Result<()> {
        let rrev = require_recipe_revision(&pref.recipe)?;
        let prev = require_package_revision(pref)?;
        let timestamp = pref.timestamp.ok_or_else(|| {
            Error::InvalidState(format!("Package '{}' has no timestamp", pref.repr()))
        })?;

        debug!("Registering package {} at {}", pref.repr(), path);
        self.table.with_connection(|conn| {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                PACKAGES.name,
                PACKAGES.column_list(),
                PACKAGES.placeholders()
            );
            match conn.execute(
                &sql,
                params![
                    pref.recipe.to_string(),
                    rrev,
                    pref.package_id,
                    prev,
                    path,
                    timestamp,
                    build_id
                ],
            ) {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists(format!(
                    "Reference '{}' already exists",
                    pref.repr()
                ))),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// The exact package revision's row
    pub fn get(&self, pref: &PkgReference) -> Result<PackageRow> {
        let rrev = require_recipe_revision(&pref.recipe)?;
        let prev = require_package_revision(pref)?;

        let row = self.table.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM packages \
                 WHERE reference = ?1 AND rrev = ?2 AND pkgid = ?3 AND prev = ?4",
                SELECT_COLUMNS
            );
            Ok(conn
                .query_row(
                    &sql,
                    params![pref.recipe.to_string(), rrev, pref.package_id, prev],
                    PackageRow::from_row,
                )
                .optional()?)
        })?;

        row.ok_or_else(|| not_found(pref))
    }

    /// Refresh timestamp, path and build id of an existing row
    pub fn update_timestamp(
        &self,
        pref: &PkgReference,
        path: &str,
        build_id: Option<&str>,
    ) -> Result<()> {
        let rrev = require_recipe_revision(&pref.recipe)?;
        let prev = require_package_revision(pref)?;
        let timestamp = pref.timestamp.ok_or_else(|| {
            Error::InvalidState(format!("Package '{}' has no timestamp", pref.repr()))
        })?;

        let updated = self.table.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE packages SET timestamp = ?1, path = ?2, build_id = ?3 \
                 WHERE reference = ?4 AND rrev = ?5 AND pkgid = ?6 AND prev = ?7",
                params![
                    timestamp,
                    path,
                    build_id,
                    pref.recipe.to_string(),
                    rrev,
                    pref.package_id,
                    prev
                ],
            )?)
        })?;

        if updated == 0 {
            return Err(not_found(pref));
        }
        Ok(())
    }

    /// Forget which build produced this package
    pub fn remove_build_id(&self, pref: &PkgReference) -> Result<()> {
        let rrev = require_recipe_revision(&pref.recipe)?;
        let prev = require_package_revision(pref)?;

        self.table.with_connection(|conn| {
            conn.execute(
                "UPDATE packages SET build_id = NULL \
                 WHERE reference = ?1 AND rrev = ?2 AND pkgid = ?3 AND prev = ?4",
                params![pref.recipe.to_string(), rrev, pref.package_id, prev],
            )?;
            Ok(())
        })
    }

    /// Delete the exact package revision
    pub fn remove(&self, pref: &PkgReference) -> Result<usize> {
        let rrev = require_recipe_revision(&pref.recipe)?;
        let prev = require_package_revision(pref)?;

        self.table.with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM packages \
                 WHERE reference = ?1 AND rrev = ?2 AND pkgid = ?3 AND prev = ?4",
                params![pref.recipe.to_string(), rrev, pref.package_id, prev],
            )?)
        })
    }

    /// Delete every package of a recipe revision, whatever its package id
    /// or package revision. Without a recipe revision, every package of
    /// every revision of the reference goes.
    pub fn remove_recipe(&self, reference: &RecipeReference) -> Result<usize> {
        self.table.with_connection(|conn| {
            let removed = match &reference.revision {
                Some(rrev) => conn.execute(
                    "DELETE FROM packages WHERE reference = ?1 AND rrev = ?2",
                    params![reference.to_string(), rrev],
                )?,
                None => conn.execute(
                    "DELETE FROM packages WHERE reference = ?1",
                    params![reference.to_string()],
                )?,
            };
            debug!(
                "Removed {} package row(s) for {}",
                removed,
                reference.repr_notime()
            );
            Ok(removed)
        })
    }

    /// Revisions of one package id, most recent first. A package revision
    /// on `pref` restricts the result to that revision.
    pub fn get_revisions(&self, pref: &PkgReference, only_latest: bool) -> Result<Vec<PackageRow>> {
        let rrev = require_recipe_revision(&pref.recipe)?;
        let limit = if only_latest { 1 } else { -1 };

        self.table.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM packages \
                 WHERE reference = ?1 AND rrev = ?2 AND pkgid = ?3 \
                 AND (?4 IS NULL OR prev = ?4) \
                 ORDER BY timestamp DESC, prev DESC LIMIT ?5",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        pref.recipe.to_string(),
                        rrev,
                        pref.package_id,
                        pref.revision,
                        limit
                    ],
                    PackageRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Packages of a recipe revision. With `only_latest`, one row per
    /// package id (its latest revision), ordered by package id; otherwise
    /// every package revision, most recent first.
    pub fn get_package_references(
        &self,
        reference: &RecipeReference,
        only_latest: bool,
    ) -> Result<Vec<PackageRow>> {
        let rrev = require_recipe_revision(reference)?;

        self.table.with_connection(|conn| {
            let sql = if only_latest {
                format!(
                    "SELECT {cols} FROM (\
                        SELECT {cols}, ROW_NUMBER() OVER (\
                            PARTITION BY pkgid ORDER BY timestamp DESC, prev DESC\
                        ) AS rn \
                        FROM packages WHERE reference = ?1 AND rrev = ?2\
                     ) WHERE rn = 1 ORDER BY pkgid",
                    cols = SELECT_COLUMNS
                )
            } else {
                format!(
                    "SELECT {} FROM packages WHERE reference = ?1 AND rrev = ?2 \
                     ORDER BY timestamp DESC, prev DESC",
                    SELECT_COLUMNS
                )
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![reference.to_string(), rrev], PackageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The first package of a recipe revision produced by `build_id`
    pub fn get_with_build_id(
        &self,
        reference: &RecipeReference,
        build_id: &str,
    ) -> Result<Option<PackageRow>> {
        let rrev = require_recipe_revision(reference)?;

        self.table.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM packages \
                 WHERE reference = ?1 AND rrev = ?2 AND build_id = ?3 \
                 ORDER BY timestamp DESC LIMIT 1",
                SELECT_COLUMNS
            );
            Ok(conn
                .query_row(
                    &sql,
                    params![reference.to_string(), rrev, build_id],
                    PackageRow::from_row,
                )
                .optional()?)
        })
    }
}

fn not_found(pref: &PkgReference) -> Error {
    Error::DoesNotExist(format!("No entry for package '{}'", pref.repr_notime()))
}
