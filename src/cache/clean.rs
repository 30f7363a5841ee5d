// src/cache/clean.rs

//! Space reclamation
//!
//! Cleaning removes working folders (sources, builds, download caches,
//! abandoned staging folders) but never an identity: index rows, `export/`
//! and `package/` folders stay where they are.
//!
//! Temp cleaning removes everything under the staging roots, including
//! exports or builds still in progress. Do not run it while another
//! process is using the cache.

use crate::cache::PkgCache;
use crate::cache::layout::remove_folder;
use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

/// What to clean. All false cleans nothing; see [`CleanOptions::all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanOptions {
    /// Unpacked recipe sources
    pub source: bool,
    /// Package build folders (also drops the build id)
    pub build: bool,
    /// Download caches of recipes and packages
    pub download: bool,
    /// Uncommitted staging folders
    pub temp: bool,
}

impl CleanOptions {
    pub fn all() -> Self {
        Self {
            source: true,
            build: true,
            download: true,
            temp: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.source || self.build || self.download || self.temp)
    }

    /// These options, or everything if none is set
    pub fn or_all(self) -> Self {
        if self.is_empty() { Self::all() } else { self }
    }
}

/// Summary of a clean run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Recipe revisions visited
    pub recipes: usize,
    /// Package revisions visited
    pub packages: usize,
    /// Staging folders removed
    pub temp_folders: usize,
    /// Index rows whose folder is missing, left untouched
    pub dangling: Vec<String>,
}

/// Clean every recipe revision matching `pattern`, and its packages
pub fn clean(cache: &PkgCache, pattern: &str, options: CleanOptions) -> Result<CleanReport> {
    let mut report = CleanReport::default();

    if options.source || options.build || options.download {
        for reference in cache.search_recipes(pattern)? {
            for rrev in cache.get_recipe_revisions_references(&reference)? {
                let layout = match cache.get_recipe_layout(&rrev) {
                    Ok(layout) => layout,
                    Err(Error::DanglingEntry { reference, path }) => {
                        warn!("Skipping {}: {} is missing", reference, path.display());
                        report.dangling.push(reference);
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                if options.source {
                    layout.sources_remove()?;
                }
                if options.download {
                    layout.download_remove()?;
                }
                report.recipes += 1;

                for pref in cache.get_package_references(&rrev, false)? {
                    let pkg_layout = match cache.get_package_layout(&pref) {
                        Ok(layout) => layout,
                        Err(Error::DanglingEntry { reference, path }) => {
                            warn!("Skipping {}: {} is missing", reference, path.display());
                            report.dangling.push(reference);
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    if options.build {
                        pkg_layout.build_remove()?;
                        cache.remove_build_id(&pref)?;
                    }
                    if options.download {
                        pkg_layout.download_remove()?;
                    }
                    report.packages += 1;
                }
            }
        }
    }

    if options.temp {
        report.temp_folders += clean_staging(&cache.temp_folder())?;
        report.temp_folders += clean_staging(&cache.builds_folder())?;
    }

    info!(
        "Cleaned {} recipe revision(s), {} package revision(s), {} staging folder(s)",
        report.recipes, report.packages, report.temp_folders
    );
    Ok(report)
}

/// Empty a staging root. Staged folders are never registered, so nothing
/// here has an index row.
fn clean_staging(root: &Path) -> Result<usize> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            remove_folder(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}
