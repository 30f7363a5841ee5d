// src/cache/integrity.rs

//! File manifests and the cache integrity check
//!
//! A manifest records the SHA-256 of every file below a folder. It is
//! written as `conanmanifest.txt` in that folder:
//!
//! ```text
//! 1700000000
//! conanfile.py: 3a7bd3e2360a3d29eea436fcfb7e44c735d117c42d1c1835420b6b9942dd4f1b
//! src/main.c: 0ec8b1b4d9...
//! ```
//!
//! The first line is the creation time, every other line is a relative
//! path and its hash. Only the file hashes take part in comparisons.

use crate::cache::PkgCache;
use crate::error::{Error, Result};
use crate::hash::sha256_file;
use crate::reference::RecipeReference;
use chrono::Utc;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const MANIFEST_FILENAME: &str = "conanmanifest.txt";

/// Hashes of every file below a folder
#[derive(Debug, Clone)]
pub struct FileManifest {
    /// Creation time, epoch seconds
    pub time: i64,
    /// Relative path (`/` separated) to SHA-256
    pub files: BTreeMap<String, String>,
}

impl PartialEq for FileManifest {
    fn eq(&self, other: &Self) -> bool {
        self.files == other.files
    }
}

impl Eq for FileManifest {}

impl FileManifest {
    /// Hash every file below `folder`, except a manifest already there
    pub fn create(folder: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        collect_files(folder, &mut files)?;
        Ok(Self {
            time: Utc::now().timestamp(),
            files,
        })
    }

    /// Read `conanmanifest.txt` from `folder`
    pub fn load(folder: &Path) -> Result<Self> {
        let path = folder.join(MANIFEST_FILENAME);
        let text = fs::read_to_string(&path)?;
        Self::parse(&text).ok_or_else(|| {
            Error::InvalidState(format!("Malformed manifest {}", path.display()))
        })
    }

    fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let time = lines.next()?.trim().parse::<i64>().ok()?;

        let mut files = BTreeMap::new();
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let (file, hash) = line.rsplit_once(": ")?;
            files.insert(file.to_string(), hash.trim().to_string());
        }
        Some(Self { time, files })
    }

    /// Write `conanmanifest.txt` into `folder`
    pub fn save(&self, folder: &Path) -> Result<()> {
        fs::write(folder.join(MANIFEST_FILENAME), self.to_string())?;
        Ok(())
    }

    /// Human readable differences between `self` (recorded) and `actual`
    pub fn differences(&self, actual: &FileManifest) -> Vec<String> {
        let mut diffs = Vec::new();
        for (file, hash) in &self.files {
            match actual.files.get(file) {
                None => diffs.push(format!("{}: missing", file)),
                Some(found) if found != hash => diffs.push(format!("{}: modified", file)),
                Some(_) => {}
            }
        }
        for file in actual.files.keys() {
            if !self.files.contains_key(file) {
                diffs.push(format!("{}: unexpected", file));
            }
        }
        diffs
    }
}

impl std::fmt::Display for FileManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.time)?;
        for (file, hash) in &self.files {
            writeln!(f, "{}: {}", file, hash)?;
        }
        Ok(())
    }
}

fn collect_files(folder: &Path, files: &mut BTreeMap<String, String>) -> Result<()> {
    for entry in WalkDir::new(folder).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(folder) else {
            continue;
        };
        if relative == Path::new(MANIFEST_FILENAME) {
            continue;
        }

        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(key, sha256_file(entry.path())?);
    }
    Ok(())
}

/// Compare the manifest saved in `folder` with its current contents
fn check_folder(label: &str, folder: &Path) -> Vec<String> {
    if !folder.is_dir() {
        return vec![format!("{}: folder {} is missing", label, folder.display())];
    }

    let recorded = match FileManifest::load(folder) {
        Ok(manifest) => manifest,
        Err(e) => return vec![format!("{}: cannot read manifest: {}", label, e)],
    };
    let actual = match FileManifest::create(folder) {
        Ok(manifest) => manifest,
        Err(e) => return vec![format!("{}: cannot hash files: {}", label, e)],
    };

    recorded
        .differences(&actual)
        .into_iter()
        .map(|diff| format!("{}: {}", label, diff))
        .collect()
}

fn check_reference(cache: &PkgCache, reference: &RecipeReference) -> Result<Vec<String>> {
    let revisions = match reference.revision {
        Some(_) => vec![reference.clone()],
        None => cache.get_recipe_revisions_references(reference)?,
    };

    let mut problems = Vec::new();
    for rrev in revisions {
        let label = rrev.repr_notime();
        match cache.get_recipe_layout(&rrev) {
            Ok(layout) => problems.extend(check_folder(&label, &layout.export())),
            Err(e @ Error::DanglingEntry { .. }) => {
                problems.push(e.to_string());
                continue;
            }
            Err(e) => return Err(e),
        }

        for pref in cache.get_package_references(&rrev, false)? {
            let label = pref.repr_notime();
            match cache.get_package_layout(&pref) {
                Ok(layout) => problems.extend(check_folder(&label, &layout.package())),
                Err(e @ Error::DanglingEntry { .. }) => problems.push(e.to_string()),
                Err(e) => return Err(e),
            }
        }
    }

    debug!("Checked {}: {} problem(s)", reference, problems.len());
    Ok(problems)
}

/// Verify the recorded manifests of every recipe export and package folder
/// of `references`. Mismatches are collected over all references and
/// reported together; nothing is repaired.
pub fn check_integrity(cache: &PkgCache, references: &[RecipeReference]) -> Result<()> {
    let per_reference = references
        .par_iter()
        .map(|reference| check_reference(cache, reference))
        .collect::<Result<Vec<_>>>()?;

    let mut problems: Vec<String> = per_reference.into_iter().flatten().collect();
    if problems.is_empty() {
        info!("Integrity check passed for {} reference(s)", references.len());
        return Ok(());
    }

    problems.sort();
    warn!("Integrity check found {} problem(s)", problems.len());
    Err(Error::IntegrityMismatch(problems))
}
