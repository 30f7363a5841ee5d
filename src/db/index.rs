// src/db/index.rs

//! The cache index: both tables behind one facade
//!
//! [`CacheDatabase`] adds the cross-table operations (cascading removal,
//! existence checks, build-id matching) and the "latest" wrappers that
//! report an absent value instead of failing.

use crate::config::CacheConfig;
use crate::db;
use crate::db::lock::LockRegistry;
use crate::db::models::{PackageRow, RecipeRow};
use crate::db::packages::PackagesTable;
use crate::db::recipes::RecipesTable;
use crate::error::Result;
use crate::reference::{PkgReference, RecipeReference};
use tracing::debug;

/// Index of every committed recipe and package revision in one cache
#[derive(Debug, Clone)]
pub struct CacheDatabase {
    recipes: RecipesTable,
    packages: PackagesTable,
}

impl CacheDatabase {
    /// Open (creating and migrating if needed) the database described by
    /// `config`, with locks taken from `registry`
    pub fn open(config: &CacheConfig, registry: &LockRegistry) -> Result<Self> {
        let db_path = config.db_path();

        {
            // Migration runs under the same lock as every other statement
            let lock = registry.lock_for(&db_path);
            let _guard = lock.acquire(config.lock_timeout)?;
            db::init(&db_path, config.busy_timeout)?;
        }

        let recipes =
            RecipesTable::new(&db_path, registry, config.lock_timeout, config.busy_timeout)?;
        let packages =
            PackagesTable::new(&db_path, registry, config.lock_timeout, config.busy_timeout)?;

        debug!("Opened cache index {}", db_path.display());
        Ok(Self { recipes, packages })
    }

    // Probes

    pub fn exists_rrev(&self, reference: &RecipeReference) -> Result<bool> {
        absent_as_false(self.recipes.get(reference))
    }

    pub fn exists_prev(&self, pref: &PkgReference) -> Result<bool> {
        absent_as_false(self.packages.get(pref))
    }

    // Recipes

    /// The row of an exact revision, or of the latest revision when the
    /// reference carries none
    pub fn get_recipe(&self, reference: &RecipeReference) -> Result<RecipeRow> {
        match reference.revision {
            Some(_) => self.recipes.get(reference),
            None => self.recipes.get_latest(reference),
        }
    }

    /// Latest revision's row; `DoesNotExist` if the reference has none
    pub fn get_latest_recipe(&self, reference: &RecipeReference) -> Result<RecipeRow> {
        self.recipes.get_latest(reference)
    }

    /// Latest revision with its timestamp, or `None`
    pub fn get_latest_recipe_reference(
        &self,
        reference: &RecipeReference,
    ) -> Result<Option<RecipeReference>> {
        absent_as_none(self.recipes.get_latest(reference)).map(|row| row.map(|r| r.reference))
    }

    /// Every committed revision, most recent first
    pub fn get_recipe_revisions_references(
        &self,
        reference: &RecipeReference,
    ) -> Result<Vec<RecipeReference>> {
        Ok(self
            .recipes
            .get_revisions(reference)?
            .into_iter()
            .map(|row| row.reference)
            .collect())
    }

    pub fn create_recipe(&self, path: &str, reference: &RecipeReference) -> Result<()> {
        self.recipes.create(path, reference)
    }

    pub fn update_recipe_timestamp(&self, reference: &RecipeReference) -> Result<()> {
        self.recipes.update_timestamp(reference)
    }

    pub fn get_recipe_lru(&self, reference: &RecipeReference) -> Result<i64> {
        Ok(self.recipes.get(reference)?.lru)
    }

    pub fn update_recipe_lru(&self, reference: &RecipeReference) -> Result<()> {
        self.recipes.update_lru(reference)
    }

    /// Revisions not used since `cutoff` (epoch seconds)
    pub fn get_recipes_lru_older_than(&self, cutoff: i64) -> Result<Vec<RecipeReference>> {
        Ok(self
            .recipes
            .get_lru_older_than(cutoff)?
            .into_iter()
            .map(|row| row.reference)
            .collect())
    }

    /// Delete recipe rows and, with them, every package row of the same
    /// recipe revision (or of every revision if none is given)
    pub fn remove_recipe(&self, reference: &RecipeReference) -> Result<()> {
        let recipes = self.recipes.remove(reference)?;
        let packages = self.packages.remove_recipe(reference)?;
        debug!(
            "Removed {} ({} recipe rows, {} package rows)",
            reference.repr_notime(),
            recipes,
            packages
        );
        Ok(())
    }

    /// Every known reference, without revision
    pub fn list_references(&self) -> Result<Vec<RecipeReference>> {
        self.recipes.all_references()
    }

    // Packages

    pub fn get_package(&self, pref: &PkgReference) -> Result<PackageRow> {
        self.packages.get(pref)
    }

    /// Latest revision of one package id, or `None`
    pub fn get_latest_package_reference(&self, pref: &PkgReference) -> Result<Option<PkgReference>> {
        let lookup = PkgReference {
            revision: None,
            timestamp: None,
            ..pref.clone()
        };
        let mut rows = self.packages.get_revisions(&lookup, true)?;
        Ok(rows.pop().map(|row| row.pref))
    }

    /// Revisions of one package id, most recent first
    pub fn get_package_revisions_references(
        &self,
        pref: &PkgReference,
        only_latest: bool,
    ) -> Result<Vec<PkgReference>> {
        Ok(self
            .packages
            .get_revisions(pref, only_latest)?
            .into_iter()
            .map(|row| row.pref)
            .collect())
    }

    /// Packages of a recipe revision; `DoesNotExist` if the recipe
    /// revision itself is not in the index
    pub fn get_package_references(
        &self,
        reference: &RecipeReference,
        only_latest: bool,
    ) -> Result<Vec<PkgReference>> {
        self.recipes.get(reference)?;
        Ok(self
            .packages
            .get_package_references(reference, only_latest)?
            .into_iter()
            .map(|row| row.pref)
            .collect())
    }

    /// A package of `reference` produced by `build_id`, or `None`
    pub fn get_matching_build_id(
        &self,
        reference: &RecipeReference,
        build_id: &str,
    ) -> Result<Option<PkgReference>> {
        Ok(self
            .packages
            .get_with_build_id(reference, build_id)?
            .map(|row| row.pref))
    }

    pub fn create_package(
        &self,
        path: &str,
        pref: &PkgReference,
        build_id: Option<&str>,
    ) -> Result<()> {
        self.packages.create(path, pref, build_id)
    }

    pub fn update_package_timestamp(
        &self,
        pref: &PkgReference,
        path: &str,
        build_id: Option<&str>,
    ) -> Result<()> {
        self.packages.update_timestamp(pref, path, build_id)
    }

    pub fn remove_package(&self, pref: &PkgReference) -> Result<()> {
        self.packages.remove(pref)?;
        Ok(())
    }

    pub fn remove_build_id(&self, pref: &PkgReference) -> Result<()> {
        self.packages.remove_build_id(pref)
    }
}

fn absent_as_false<T>(result: Result<T>) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_does_not_exist() => Ok(false),
        Err(e) => Err(e),
    }
}

fn absent_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_does_not_exist() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    fn open_index(temp: &TempDir) -> CacheDatabase {
        CacheDatabase::open(&CacheConfig::new(temp.path()), &LockRegistry::new()).unwrap()
    }

    fn rref(text: &str) -> RecipeReference {
        RecipeReference::loads(text).unwrap()
    }

    fn pref(text: &str) -> PkgReference {
        PkgReference::loads(text).unwrap()
    }

    #[test]
    fn test_open_creates_database() {
        let temp = TempDir::new().unwrap();
        let _db = open_index(&temp);
        assert!(temp.path().join("cache.sqlite3").exists());

        // Reopening an existing cache is fine
        let _db = open_index(&temp);
    }

    #[test]
    fn test_latest_reference_is_absent_not_an_error() {
        let temp = TempDir::new().unwrap();
        let db = open_index(&temp);

        assert!(db.get_latest_recipe_reference(&rref("zlib/1.2.11")).unwrap().is_none());
        assert!(db.get_latest_recipe(&rref("zlib/1.2.11")).unwrap_err().is_does_not_exist());
        assert!(
            db.get_latest_package_reference(&pref("zlib/1.2.11#r1:pid"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_get_recipe_without_revision_resolves_latest() {
        let temp = TempDir::new().unwrap();
        let db = open_index(&temp);

        db.create_recipe("p1", &rref("zlib/1.2.11#r1%1.0")).unwrap();
        db.create_recipe("p2", &rref("zlib/1.2.11#r2%2.0")).unwrap();

        assert_eq!(db.get_recipe(&rref("zlib/1.2.11")).unwrap().path, "p2");
        assert_eq!(db.get_recipe(&rref("zlib/1.2.11#r1")).unwrap().path, "p1");

        // Touching the older revision promotes it back to latest
        db.update_recipe_timestamp(&rref("zlib/1.2.11#r1%3.0")).unwrap();
        let latest = db.get_latest_recipe_reference(&rref("zlib/1.2.11")).unwrap().unwrap();
        assert_eq!(latest.revision.as_deref(), Some("r1"));

        let revisions = db.get_recipe_revisions_references(&rref("zlib/1.2.11")).unwrap();
        let revs: Vec<_> = revisions.iter().map(|r| r.revision.clone().unwrap()).collect();
        assert_eq!(revs, vec!["r1", "r2"]);
    }

    #[test]
    fn test_exists_probes() {
        let temp = TempDir::new().unwrap();
        let db = open_index(&temp);

        db.create_recipe("p1", &rref("zlib/1.2.11#r1%1.0")).unwrap();
        db.create_package("k1", &pref("zlib/1.2.11#r1:pid#p1%1.0"), None).unwrap();

        assert!(db.exists_rrev(&rref("zlib/1.2.11#r1")).unwrap());
        assert!(!db.exists_rrev(&rref("zlib/1.2.11#r9")).unwrap());
        assert!(db.exists_prev(&pref("zlib/1.2.11#r1:pid#p1")).unwrap());
        assert!(!db.exists_prev(&pref("zlib/1.2.11#r1:pid#p9")).unwrap());
    }

    #[test]
    fn test_remove_recipe_cascades() {
        let temp = TempDir::new().unwrap();
        let db = open_index(&temp);

        db.create_recipe("p1", &rref("zlib/1.2.11#r1%1.0")).unwrap();
        db.create_package("k1", &pref("zlib/1.2.11#r1:pid1#p1%1.0"), None).unwrap();
        db.create_package("k2", &pref("zlib/1.2.11#r1:pid1#p2%2.0"), None).unwrap();
        db.create_package("k3", &pref("zlib/1.2.11#r1:pid2#p3%2.0"), None).unwrap();

        db.remove_recipe(&rref("zlib/1.2.11#r1")).unwrap();

        let err = db.get_package_references(&rref("zlib/1.2.11#r1"), false).unwrap_err();
        assert!(err.is_does_not_exist());
        assert!(!db.exists_prev(&pref("zlib/1.2.11#r1:pid1#p2")).unwrap());
        assert!(db.list_references().unwrap().is_empty());
    }

    #[test]
    fn test_package_queries() {
        let temp = TempDir::new().unwrap();
        let db = open_index(&temp);

        db.create_recipe("p1", &rref("zlib/1.2.11#r1%1.0")).unwrap();
        db.create_package("k1", &pref("zlib/1.2.11#r1:pid1#p1%1.0"), None).unwrap();
        db.create_package("k2", &pref("zlib/1.2.11#r1:pid1#p2%2.0"), None).unwrap();
        db.create_package("k3", &pref("zlib/1.2.11#r1:pid2#p3%1.5"), None).unwrap();

        let latest = db
            .get_latest_package_reference(&pref("zlib/1.2.11#r1:pid1#p1"))
            .unwrap()
            .unwrap();
        assert_eq!(latest.revision.as_deref(), Some("p2"));

        let per_id = db.get_package_references(&rref("zlib/1.2.11#r1"), true).unwrap();
        assert_eq!(per_id.len(), 2);

        let history = db
            .get_package_revisions_references(&pref("zlib/1.2.11#r1:pid1"), false)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].revision.as_deref(), Some("p2"));
    }

    #[test]
    fn test_build_id_linkage() {
        let temp = TempDir::new().unwrap();
        let db = open_index(&temp);

        db.create_recipe("p1", &rref("zlib/1.2.11#r1%1.0")).unwrap();
        db.create_package("k1", &pref("zlib/1.2.11#r1:pid1#p1%1.0"), Some("combo"))
            .unwrap();

        let found = db.get_matching_build_id(&rref("zlib/1.2.11#r1"), "combo").unwrap();
        assert_eq!(found.unwrap().package_id, "pid1");

        db.remove_build_id(&pref("zlib/1.2.11#r1:pid1#p1")).unwrap();
        assert!(db.get_matching_build_id(&rref("zlib/1.2.11#r1"), "combo").unwrap().is_none());
        assert!(db.exists_prev(&pref("zlib/1.2.11#r1:pid1#p1")).unwrap());
    }

    #[test]
    fn test_lru_accessors() {
        let temp = TempDir::new().unwrap();
        let db = open_index(&temp);

        db.create_recipe("p1", &rref("zlib/1.2.11#r1%1.0")).unwrap();
        let lru = db.get_recipe_lru(&rref("zlib/1.2.11#r1")).unwrap();
        assert!(lru > 0);

        assert!(db.get_recipes_lru_older_than(lru).unwrap().is_empty());
        let stale = db.get_recipes_lru_older_than(lru + 1).unwrap();
        assert_eq!(stale.len(), 1);

        db.update_recipe_lru(&rref("zlib/1.2.11#r1")).unwrap();
        assert!(matches!(
            db.update_recipe_lru(&rref("zlib/1.2.11#r9")),
            Err(Error::DoesNotExist(_))
        ));
    }
}
