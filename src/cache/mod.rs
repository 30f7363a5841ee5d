// src/cache/mod.rs

//! The package cache
//!
//! [`PkgCache`] owns a base folder and the index of everything committed
//! below it. Entries go through two states:
//!
//! - staged: a fresh folder under `t/` (recipe exports) or `b/` (package
//!   builds), unique per attempt and never registered in the index
//! - committed: a folder named after the exact revision, directly under
//!   the base folder, with an index row pointing at it
//!
//! Committing moves the staged folder into place first and registers it
//! second, so any row a reader finds has its folder on disk. Paths in the
//! index are relative to the base folder, which makes the whole tree
//! relocatable.

pub mod clean;
pub mod integrity;
pub mod layout;

pub use clean::{CleanOptions, CleanReport, clean};
pub use integrity::{FileManifest, check_integrity};
pub use layout::{PackageLayout, RecipeLayout};

use crate::config::CacheConfig;
use crate::db::{CacheDatabase, LockRegistry};
use crate::error::{Error, Result};
use crate::hash::short_hash;
use crate::reference::{PkgReference, RecipeReference, RefPattern, timestamp_now};
use self::layout::remove_folder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Staging root for recipe exports
pub const TEMP_FOLDER: &str = "t";

/// Staging root for package builds
pub const BUILDS_FOLDER: &str = "b";

fn name_prefix(name: &str) -> String {
    name.chars().take(5).collect()
}

/// Folder name of a committed recipe revision
fn recipe_path(reference: &RecipeReference) -> String {
    format!(
        "{}{}",
        name_prefix(&reference.name),
        short_hash(&reference.repr_notime())
    )
}

/// Folder name of a committed package revision
fn package_path(pref: &PkgReference) -> String {
    format!(
        "{}{}",
        name_prefix(&pref.recipe.name),
        short_hash(&pref.repr_notime())
    )
}

/// Revision-aware store of recipes and package binaries
///
/// Cloning is cheap and clones share the database lock, so a clone can be
/// handed to each worker thread.
#[derive(Debug, Clone)]
pub struct PkgCache {
    config: CacheConfig,
    db: CacheDatabase,
}

impl PkgCache {
    /// Open the cache at `config.base_folder`, creating it if needed
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::with_registry(config, &LockRegistry::new())
    }

    /// Open the cache with locks from an existing registry, so several
    /// caches over the same folder in one process exclude each other
    pub fn with_registry(mut config: CacheConfig, registry: &LockRegistry) -> Result<Self> {
        fs::create_dir_all(&config.base_folder)?;
        config.base_folder = fs::canonicalize(&config.base_folder)?;

        let db = CacheDatabase::open(&config, registry)?;
        info!("Opened package cache at {}", config.base_folder.display());

        Ok(Self { config, db })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Absolute base folder
    pub fn base_folder(&self) -> &Path {
        &self.config.base_folder
    }

    pub fn temp_folder(&self) -> PathBuf {
        self.config.base_folder.join(TEMP_FOLDER)
    }

    pub fn builds_folder(&self) -> PathBuf {
        self.config.base_folder.join(BUILDS_FOLDER)
    }

    fn full_path(&self, relative: &str) -> PathBuf {
        self.config.base_folder.join(relative)
    }

    /// Create a folder; with `remove_contents` an existing one is emptied
    fn create_folder(&self, path: &Path, remove_contents: bool) -> Result<()> {
        if remove_contents && path.exists() {
            remove_folder(path)?;
        }
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn checked_folder(&self, relative: &str, reference: String) -> Result<PathBuf> {
        let path = self.full_path(relative);
        if !path.is_dir() {
            return Err(Error::DanglingEntry { reference, path });
        }
        Ok(path)
    }

    // Staging

    /// Stage a recipe export. The reference must not carry a revision yet;
    /// the caller fills the layout, computes the revision and calls
    /// [`PkgCache::assign_rrev`].
    pub fn create_export_recipe_layout(&self, reference: &RecipeReference) -> Result<RecipeLayout> {
        if reference.revision.is_some() || reference.timestamp.is_some() {
            return Err(Error::InvalidState(format!(
                "Cannot export '{}': the revision is computed after export",
                reference.repr()
            )));
        }

        let attempt = Uuid::new_v4().to_string();
        let relative = Path::new(TEMP_FOLDER).join(format!(
            "{}{}",
            name_prefix(&reference.name),
            short_hash(&format!("{}{}", reference.repr_notime(), attempt))
        ));
        let path = self.config.base_folder.join(relative);
        self.create_folder(&path, true)?;

        info!("Staged export of {} in {}", reference, path.display());
        Ok(RecipeLayout::new(reference.clone(), path))
    }

    /// Stage a package build. The package reference needs a recipe revision
    /// but no package revision.
    pub fn create_build_pkg_layout(&self, pref: &PkgReference) -> Result<PackageLayout> {
        if pref.recipe.revision.is_none() {
            return Err(Error::InvalidState(format!(
                "Cannot build '{}' without a recipe revision",
                pref
            )));
        }
        if pref.revision.is_some() {
            return Err(Error::InvalidState(format!(
                "Cannot build '{}': the package revision is computed after build",
                pref.repr()
            )));
        }

        let attempt = Uuid::new_v4().to_string();
        let relative = Path::new(BUILDS_FOLDER).join(format!(
            "{}{}",
            name_prefix(&pref.recipe.name),
            short_hash(&format!("{}{}", pref.repr_notime(), attempt))
        ));
        let path = self.config.base_folder.join(relative);
        self.create_folder(&path, true)?;

        info!("Staged build of {} in {}", pref.repr_notime(), path.display());
        Ok(PackageLayout::new(pref.clone(), path))
    }

    // Commit

    /// Promote a staged export to its permanent, revision-keyed folder and
    /// register it. Committing a revision that is already registered only
    /// refreshes its timestamp.
    pub fn assign_rrev(&self, layout: &mut RecipeLayout) -> Result<()> {
        if layout.reference().revision.is_none() {
            return Err(Error::InvalidState(format!(
                "Cannot commit '{}' before its revision is set",
                layout.reference()
            )));
        }
        if layout.reference().timestamp.is_none() {
            layout.set_timestamp(timestamp_now());
        }
        let reference = layout.reference().clone();

        let relative = recipe_path(&reference);
        let permanent = self.full_path(&relative);

        if layout.base_folder() != permanent {
            if permanent.exists() {
                // Same revision means same content
                warn!(
                    "{} is already in the cache, discarding {}",
                    reference.repr_notime(),
                    layout.base_folder().display()
                );
                remove_folder(layout.base_folder())?;
            } else if let Err(e) = fs::rename(layout.base_folder(), &permanent) {
                if !permanent.exists() {
                    return Err(e.into());
                }
                warn!(
                    "{} was committed concurrently, discarding {}",
                    reference.repr_notime(),
                    layout.base_folder().display()
                );
                remove_folder(layout.base_folder())?;
            }
            layout.relocate(permanent);
        }

        match self.db.create_recipe(&relative, &reference) {
            Ok(()) => info!("Committed recipe {}", reference.repr()),
            Err(e) if e.is_already_exists() => {
                warn!(
                    "{} already registered, refreshing its timestamp",
                    reference.repr_notime()
                );
                self.db.update_recipe_timestamp(&reference)?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Promote a staged build to its permanent, revision-keyed folder and
    /// register it together with the layout's build id. A package revision
    /// that is already on disk keeps its folder; the staged copy is
    /// discarded and only the row is refreshed.
    pub fn assign_prev(&self, layout: &mut PackageLayout) -> Result<()> {
        if layout.reference().revision.is_none() {
            return Err(Error::InvalidState(format!(
                "Cannot commit '{}' before its package revision is set",
                layout.reference()
            )));
        }
        layout.set_timestamp(timestamp_now());
        let pref = layout.reference().clone();
        let build_id = layout.build_id().map(str::to_string);

        let relative = package_path(&pref);
        let permanent = self.full_path(&relative);

        if layout.base_folder() != permanent {
            if permanent.exists() {
                // Same package revision means same binary
                warn!(
                    "{} is already in the cache, discarding {}",
                    pref.repr_notime(),
                    layout.base_folder().display()
                );
                remove_folder(layout.base_folder())?;
            } else if let Err(e) = fs::rename(layout.base_folder(), &permanent) {
                if !permanent.exists() {
                    return Err(e.into());
                }
                warn!(
                    "{} was committed concurrently, discarding {}",
                    pref.repr_notime(),
                    layout.base_folder().display()
                );
                remove_folder(layout.base_folder())?;
            }
            layout.relocate(permanent);
        }

        match self.db.create_package(&relative, &pref, build_id.as_deref()) {
            Ok(()) => info!("Committed package {}", pref.repr()),
            Err(e) if e.is_already_exists() => {
                warn!(
                    "{} already registered, refreshing its timestamp",
                    pref.repr_notime()
                );
                self.db
                    .update_package_timestamp(&pref, &relative, build_id.as_deref())?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Register an already revisioned recipe (a download or a restore) and
    /// create its folder, keeping whatever is already in it
    pub fn create_ref_layout(&self, reference: &RecipeReference) -> Result<RecipeLayout> {
        if reference.revision.is_none() || reference.timestamp.is_none() {
            return Err(Error::InvalidState(format!(
                "Recipe '{}' needs a revision and a timestamp",
                reference.repr()
            )));
        }

        let relative = recipe_path(reference);
        let path = self.full_path(&relative);
        self.create_folder(&path, false)?;
        self.db.create_recipe(&relative, reference)?;

        debug!("Registered recipe {} at {}", reference.repr(), relative);
        Ok(RecipeLayout::new(reference.clone(), path))
    }

    /// Register an already revisioned package and create its folder
    pub fn create_pkg_layout(&self, pref: &PkgReference) -> Result<PackageLayout> {
        if pref.recipe.revision.is_none() || pref.revision.is_none() || pref.timestamp.is_none() {
            return Err(Error::InvalidState(format!(
                "Package '{}' needs both revisions and a timestamp",
                pref.repr()
            )));
        }

        let relative = package_path(pref);
        let path = self.full_path(&relative);
        self.create_folder(&path, false)?;
        self.db.create_package(&relative, pref, None)?;

        debug!("Registered package {} at {}", pref.repr(), relative);
        Ok(PackageLayout::new(pref.clone(), path))
    }

    pub fn get_or_create_ref_layout(&self, reference: &RecipeReference) -> Result<RecipeLayout> {
        match self.get_recipe_layout(reference) {
            Err(e) if e.is_does_not_exist() => self.create_ref_layout(reference),
            other => other,
        }
    }

    pub fn get_or_create_pkg_layout(&self, pref: &PkgReference) -> Result<PackageLayout> {
        match self.get_package_layout(pref) {
            Err(e) if e.is_does_not_exist() => self.create_pkg_layout(pref),
            other => other,
        }
    }

    // Lookup

    /// Layout of a committed recipe revision; without a revision, of the
    /// latest one
    pub fn get_recipe_layout(&self, reference: &RecipeReference) -> Result<RecipeLayout> {
        let row = self.db.get_recipe(reference)?;
        let path = self.checked_folder(&row.path, row.reference.repr_notime())?;
        Ok(RecipeLayout::new(row.reference, path))
    }

    /// Layout of a committed package revision
    pub fn get_package_layout(&self, pref: &PkgReference) -> Result<PackageLayout> {
        let row = self.db.get_package(pref)?;
        let path = self.checked_folder(&row.path, row.pref.repr_notime())?;
        let mut layout = PackageLayout::new(row.pref, path);
        layout.set_build_id(row.build_id.as_deref());
        Ok(layout)
    }

    /// Layout of a registered recipe revision even if its folder is gone.
    /// Only meant for removing dangling entries.
    pub fn get_registered_recipe_layout(&self, reference: &RecipeReference) -> Result<RecipeLayout> {
        let row = self.db.get_recipe(reference)?;
        let path = self.full_path(&row.path);
        Ok(RecipeLayout::new(row.reference, path))
    }

    /// Layout of a registered package revision even if its folder is gone
    pub fn get_registered_package_layout(&self, pref: &PkgReference) -> Result<PackageLayout> {
        let row = self.db.get_package(pref)?;
        let mut layout = PackageLayout::new(row.pref, self.full_path(&row.path));
        layout.set_build_id(row.build_id.as_deref());
        Ok(layout)
    }

    pub fn exists_rrev(&self, reference: &RecipeReference) -> Result<bool> {
        self.db.exists_rrev(reference)
    }

    pub fn exists_prev(&self, pref: &PkgReference) -> Result<bool> {
        self.db.exists_prev(pref)
    }

    pub fn get_latest_recipe_reference(
        &self,
        reference: &RecipeReference,
    ) -> Result<Option<RecipeReference>> {
        self.db.get_latest_recipe_reference(reference)
    }

    pub fn get_latest_package_reference(&self, pref: &PkgReference) -> Result<Option<PkgReference>> {
        self.db.get_latest_package_reference(pref)
    }

    pub fn get_recipe_revisions_references(
        &self,
        reference: &RecipeReference,
    ) -> Result<Vec<RecipeReference>> {
        self.db.get_recipe_revisions_references(reference)
    }

    pub fn get_package_revisions_references(
        &self,
        pref: &PkgReference,
        only_latest: bool,
    ) -> Result<Vec<PkgReference>> {
        self.db.get_package_revisions_references(pref, only_latest)
    }

    /// Packages of a recipe revision; with `only_latest`, one per package id
    pub fn get_package_references(
        &self,
        reference: &RecipeReference,
        only_latest: bool,
    ) -> Result<Vec<PkgReference>> {
        self.db.get_package_references(reference, only_latest)
    }

    pub fn get_matching_build_id(
        &self,
        reference: &RecipeReference,
        build_id: &str,
    ) -> Result<Option<PkgReference>> {
        self.db.get_matching_build_id(reference, build_id)
    }

    /// Every known reference, without revision
    pub fn list_references(&self) -> Result<Vec<RecipeReference>> {
        self.db.list_references()
    }

    /// References matching a glob such as `zlib/*` or `*@user/*`, sorted by
    /// name and version
    pub fn search_recipes(&self, pattern: &str) -> Result<Vec<RecipeReference>> {
        let pattern = RefPattern::new(pattern)?;
        let mut found: Vec<_> = self
            .db
            .list_references()?
            .into_iter()
            .filter(|reference| pattern.matches(reference))
            .collect();
        found.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(found)
    }

    // Touch

    /// Set a recipe revision's timestamp to the one on `reference`
    pub fn update_recipe_timestamp(&self, reference: &RecipeReference) -> Result<()> {
        self.db.update_recipe_timestamp(reference)
    }

    /// Set a package revision's timestamp to the one on `pref`, keeping its
    /// folder and build id
    pub fn update_package_timestamp(&self, pref: &PkgReference) -> Result<()> {
        let row = self.db.get_package(pref)?;
        self.db
            .update_package_timestamp(pref, &row.path, row.build_id.as_deref())
    }

    pub fn get_recipe_lru(&self, reference: &RecipeReference) -> Result<i64> {
        self.db.get_recipe_lru(reference)
    }

    pub fn update_recipe_lru(&self, reference: &RecipeReference) -> Result<()> {
        self.db.update_recipe_lru(reference)
    }

    pub fn get_recipes_lru_older_than(&self, cutoff: i64) -> Result<Vec<RecipeReference>> {
        self.db.get_recipes_lru_older_than(cutoff)
    }

    // Removal

    /// Remove a recipe revision with all its packages. Folders go first,
    /// index rows last.
    pub fn remove_recipe(&self, layout: &RecipeLayout) -> Result<()> {
        let reference = layout.reference();
        if reference.revision.is_none() {
            return Err(Error::InvalidState(format!(
                "Cannot remove '{}' without a revision",
                reference
            )));
        }

        let packages = match self.db.get_package_references(reference, false) {
            Ok(packages) => packages,
            Err(e) if e.is_does_not_exist() => Vec::new(),
            Err(e) => return Err(e),
        };
        for pref in &packages {
            let row = self.db.get_package(pref)?;
            remove_folder(&self.full_path(&row.path))?;
        }

        layout.remove()?;
        self.db.remove_recipe(reference)?;

        info!(
            "Removed {} and {} package revision(s)",
            reference.repr_notime(),
            packages.len()
        );
        Ok(())
    }

    /// Remove one package revision, folder first
    pub fn remove_package(&self, layout: &PackageLayout) -> Result<()> {
        layout.remove()?;
        self.db.remove_package(layout.reference())?;
        info!("Removed {}", layout.reference().repr_notime());
        Ok(())
    }

    /// Forget which build produced a package; the package itself stays
    pub fn remove_build_id(&self, pref: &PkgReference) -> Result<()> {
        self.db.remove_build_id(pref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_cache(temp: &TempDir) -> PkgCache {
        PkgCache::open(CacheConfig::new(temp.path().join("p"))).unwrap()
    }

    fn rref(text: &str) -> RecipeReference {
        RecipeReference::loads(text).unwrap()
    }

    fn export(cache: &PkgCache, reference: &str, revision: &str) -> RecipeLayout {
        let mut layout = cache.create_export_recipe_layout(&rref(reference)).unwrap();
        fs::create_dir_all(layout.export()).unwrap();
        fs::write(layout.conanfile(), revision).unwrap();
        layout.set_revision(revision, None);
        cache.assign_rrev(&mut layout).unwrap();
        layout
    }

    fn build(cache: &PkgCache, rrev: &RecipeReference, pkgid: &str, prev: &str) -> PackageLayout {
        let pref = PkgReference::new(rrev.clone(), pkgid);
        let mut layout = cache.create_build_pkg_layout(&pref).unwrap();
        fs::create_dir_all(layout.package()).unwrap();
        layout.set_revision(prev);
        cache.assign_prev(&mut layout).unwrap();
        layout
    }

    #[test]
    fn test_path_derivation_is_deterministic() {
        let a = rref("zlib/1.2.11#abc");
        let b = rref("zlib/1.2.11#abc%99.0");
        let c = rref("zlib/1.2.11#def");

        assert_eq!(recipe_path(&a), recipe_path(&b));
        assert_ne!(recipe_path(&a), recipe_path(&c));
        assert!(recipe_path(&a).starts_with("zlib"));
        assert_eq!(recipe_path(&a).len(), 4 + 13);

        let long = rref("openssl/3.0#abc");
        assert!(recipe_path(&long).starts_with("opens"));
        assert_eq!(recipe_path(&long).len(), 5 + 13);
    }

    #[test]
    fn test_staging_paths_are_unique_per_attempt() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let first = cache.create_export_recipe_layout(&rref("zlib/1.2.11")).unwrap();
        let second = cache.create_export_recipe_layout(&rref("zlib/1.2.11")).unwrap();

        assert_ne!(first.base_folder(), second.base_folder());
        assert!(first.base_folder().starts_with(cache.temp_folder()));
        assert!(first.base_folder().is_dir());
        assert!(!cache.exists_rrev(&rref("zlib/1.2.11#abc")).unwrap());
    }

    #[test]
    fn test_export_requires_unrevisioned_reference() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let result = cache.create_export_recipe_layout(&rref("zlib/1.2.11#abc"));
        assert!(matches!(result, Err(Error::InvalidState(_))));

        let pref = PkgReference::loads("zlib/1.2.11:pid").unwrap();
        assert!(matches!(
            cache.create_build_pkg_layout(&pref),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_assign_rrev_moves_and_registers() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let layout = export(&cache, "zlib/1.2.11", "abc123");
        assert!(layout.base_folder().starts_with(cache.base_folder()));
        assert!(!layout.base_folder().starts_with(cache.temp_folder()));
        assert!(layout.conanfile().is_file());

        let found = cache.get_recipe_layout(&rref("zlib/1.2.11")).unwrap();
        assert_eq!(found.base_folder(), layout.base_folder());
        assert_eq!(found.reference().revision.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_recommit_discards_staged_copy() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let first = export(&cache, "zlib/1.2.11", "abc123");
        let first_ts = first.reference().timestamp.unwrap();

        let mut again = cache.create_export_recipe_layout(&rref("zlib/1.2.11")).unwrap();
        let staged = again.base_folder().to_path_buf();
        again.set_revision("abc123", Some(first_ts + 10.0));
        cache.assign_rrev(&mut again).unwrap();

        assert!(!staged.exists());
        assert_eq!(again.base_folder(), first.base_folder());

        let revisions = cache
            .get_recipe_revisions_references(&rref("zlib/1.2.11"))
            .unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].timestamp, Some(first_ts + 10.0));
    }

    #[test]
    fn test_assign_prev_keeps_committed_folder() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let recipe = export(&cache, "zlib/1.2.11", "abc123");
        let rrev = recipe.reference().clone();

        let first = build(&cache, &rrev, "pid", "p1");
        fs::write(first.package().join("lib.a"), b"first").unwrap();

        let pref = PkgReference::new(rrev.clone(), "pid");
        let mut again = cache.create_build_pkg_layout(&pref).unwrap();
        let staged = again.base_folder().to_path_buf();
        fs::create_dir_all(again.package()).unwrap();
        again.set_build_id(Some("combo"));
        again.set_revision("p1");
        cache.assign_prev(&mut again).unwrap();

        assert!(!staged.exists());
        assert_eq!(first.base_folder(), again.base_folder());
        assert_eq!(fs::read(again.package().join("lib.a")).unwrap(), b"first");
        assert_eq!(
            cache.get_package_layout(again.reference()).unwrap().build_id(),
            Some("combo")
        );

        let revisions = cache
            .get_package_revisions_references(&PkgReference::new(rrev, "pid"), false)
            .unwrap();
        assert_eq!(revisions.len(), 1);
    }

    #[test]
    fn test_missing_folder_is_a_dangling_entry() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let layout = export(&cache, "zlib/1.2.11", "abc123");
        fs::remove_dir_all(layout.base_folder()).unwrap();

        let result = cache.get_recipe_layout(&rref("zlib/1.2.11#abc123"));
        assert!(matches!(result, Err(Error::DanglingEntry { .. })));
    }

    #[test]
    fn test_remove_dangling_recipe_and_packages() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let recipe = export(&cache, "zlib/1.2.11", "abc123");
        let rrev = recipe.reference().clone();
        let pkg = build(&cache, &rrev, "pid", "p1");
        let orphan = build(&cache, &rrev, "other", "p1");
        fs::remove_dir_all(recipe.base_folder()).unwrap();
        fs::remove_dir_all(pkg.base_folder()).unwrap();

        assert!(matches!(
            cache.get_package_layout(pkg.reference()),
            Err(Error::DanglingEntry { .. })
        ));
        let dangling_pkg = cache.get_registered_package_layout(pkg.reference()).unwrap();
        assert_eq!(dangling_pkg.base_folder(), pkg.base_folder());
        cache.remove_package(&dangling_pkg).unwrap();
        assert!(!cache.exists_prev(pkg.reference()).unwrap());

        let dangling = cache.get_registered_recipe_layout(&rref("zlib/1.2.11")).unwrap();
        cache.remove_recipe(&dangling).unwrap();

        assert!(!cache.exists_rrev(&rref("zlib/1.2.11#abc123")).unwrap());
        assert!(!cache.exists_prev(orphan.reference()).unwrap());
        assert!(!orphan.base_folder().exists());
        assert!(cache.list_references().unwrap().is_empty());
    }

    #[test]
    fn test_create_ref_layout_keeps_contents() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let reference = rref("zlib/1.2.11#abc%10.0");
        let layout = cache.get_or_create_ref_layout(&reference).unwrap();
        fs::write(layout.base_folder().join("marker"), b"x").unwrap();

        let again = cache.get_or_create_ref_layout(&reference).unwrap();
        assert_eq!(again.base_folder(), layout.base_folder());
        assert!(again.base_folder().join("marker").exists());

        let err = cache.create_ref_layout(&reference).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_create_pkg_layout() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        cache.create_ref_layout(&rref("zlib/1.2.11#abc%10.0")).unwrap();
        let pref = PkgReference::loads("zlib/1.2.11#abc:pid#p1%11.0").unwrap();
        let layout = cache.get_or_create_pkg_layout(&pref).unwrap();
        assert!(layout.base_folder().is_dir());
        assert!(cache.exists_prev(&pref).unwrap());
    }

    #[test]
    fn test_remove_recipe_removes_package_folders() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let recipe = export(&cache, "zlib/1.2.11", "abc123");
        let rrev = recipe.reference().clone();
        let pkg = build(&cache, &rrev, "pid", "p1");

        cache.remove_recipe(&recipe).unwrap();

        assert!(!recipe.base_folder().exists());
        assert!(!pkg.base_folder().exists());
        assert!(cache.get_package_references(&rrev, false).unwrap_err().is_does_not_exist());
        assert!(cache.list_references().unwrap().is_empty());
    }

    #[test]
    fn test_remove_package_keeps_recipe() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let recipe = export(&cache, "zlib/1.2.11", "abc123");
        let pkg = build(&cache, recipe.reference(), "pid", "p1");

        cache.remove_package(&pkg).unwrap();
        assert!(!pkg.base_folder().exists());
        assert!(!cache.exists_prev(pkg.reference()).unwrap());
        assert!(cache.exists_rrev(recipe.reference()).unwrap());
    }

    #[test]
    fn test_build_id_round_trip() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let recipe = export(&cache, "zlib/1.2.11", "abc123");
        let pref = PkgReference::new(recipe.reference().clone(), "pid");
        let mut layout = cache.create_build_pkg_layout(&pref).unwrap();
        layout.set_build_id(Some("combo"));
        layout.set_revision("p1");
        cache.assign_prev(&mut layout).unwrap();

        let found = cache
            .get_matching_build_id(recipe.reference(), "combo")
            .unwrap()
            .unwrap();
        let pkg = cache.get_package_layout(&found).unwrap();
        assert_eq!(pkg.build_id(), Some("combo"));

        cache.remove_build_id(&found).unwrap();
        assert!(cache.get_package_layout(&found).unwrap().build_id().is_none());
    }

    #[test]
    fn test_search_recipes_sorted() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        export(&cache, "zlib/1.2.11", "a");
        export(&cache, "zlib/1.2.8", "b");
        export(&cache, "bzip2/1.0.8", "c");

        let found: Vec<String> = cache
            .search_recipes("zlib/*")
            .unwrap()
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(found, vec!["zlib/1.2.8", "zlib/1.2.11"]);

        assert_eq!(cache.search_recipes("*").unwrap().len(), 3);
        assert!(cache.search_recipes("ZLIB/1.2.8").unwrap().len() == 1);
        assert!(matches!(
            cache.search_recipes("zlib/*#a"),
            Err(Error::InvalidReference(_))
        ));
    }

    #[test]
    fn test_update_package_timestamp_keeps_build_id() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let recipe = export(&cache, "zlib/1.2.11", "abc123");
        let pref = PkgReference::new(recipe.reference().clone(), "pid");
        let mut layout = cache.create_build_pkg_layout(&pref).unwrap();
        layout.set_build_id(Some("combo"));
        layout.set_revision("p1");
        cache.assign_prev(&mut layout).unwrap();

        let touched = layout.reference().clone().with_timestamp(5.0);
        cache.update_package_timestamp(&touched).unwrap();

        let pkg = cache.get_package_layout(&touched).unwrap();
        assert_eq!(pkg.reference().timestamp, Some(5.0));
        assert_eq!(pkg.build_id(), Some("combo"));
    }
}
