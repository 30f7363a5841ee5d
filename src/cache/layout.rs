// src/cache/layout.rs

//! Folder layouts of recipe and package cache entries
//!
//! The cache only creates, moves and removes an entry's base folder. The
//! sub-folders below are conventions for the code that fills them:
//!
//! ```text
//! <recipe base>/e      exported recipe files
//!              /es     exported sources
//!              /s      unpacked sources
//!              /d      download cache, with d/metadata
//! <package base>/b     build folder
//!               /p     package binaries
//!               /d     download cache, with d/metadata
//! ```

use crate::error::Result;
use crate::reference::{PkgReference, RecipeReference};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const EXPORT_FOLDER: &str = "e";
pub const EXPORT_SRC_FOLDER: &str = "es";
pub const SRC_FOLDER: &str = "s";
pub const BUILD_FOLDER: &str = "b";
pub const PACKAGES_FOLDER: &str = "p";
pub const DOWNLOAD_FOLDER: &str = "d";
pub const METADATA_FOLDER: &str = "metadata";

/// Remove a folder tree; a folder that is already gone is fine
pub(crate) fn remove_folder(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Folder of one recipe revision, or of a staged export
#[derive(Debug, Clone)]
pub struct RecipeLayout {
    reference: RecipeReference,
    base_folder: PathBuf,
}

impl RecipeLayout {
    pub fn new(reference: RecipeReference, base_folder: impl Into<PathBuf>) -> Self {
        Self {
            reference,
            base_folder: base_folder.into(),
        }
    }

    pub fn reference(&self) -> &RecipeReference {
        &self.reference
    }

    /// Pin the staged reference to the revision computed from its content
    pub fn set_revision(&mut self, revision: &str, timestamp: Option<f64>) {
        self.reference.revision = Some(revision.to_string());
        self.reference.timestamp = timestamp;
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: f64) {
        self.reference.timestamp = Some(timestamp);
    }

    pub(crate) fn relocate(&mut self, base_folder: PathBuf) {
        self.base_folder = base_folder;
    }

    pub fn base_folder(&self) -> &Path {
        &self.base_folder
    }

    pub fn export(&self) -> PathBuf {
        self.base_folder.join(EXPORT_FOLDER)
    }

    pub fn export_sources(&self) -> PathBuf {
        self.base_folder.join(EXPORT_SRC_FOLDER)
    }

    pub fn source(&self) -> PathBuf {
        self.base_folder.join(SRC_FOLDER)
    }

    pub fn download_export(&self) -> PathBuf {
        self.base_folder.join(DOWNLOAD_FOLDER)
    }

    pub fn metadata(&self) -> PathBuf {
        self.download_export().join(METADATA_FOLDER)
    }

    pub fn conanfile(&self) -> PathBuf {
        self.export().join("conanfile.py")
    }

    pub fn sources_remove(&self) -> Result<()> {
        remove_folder(&self.source())
    }

    pub fn export_remove(&self) -> Result<()> {
        remove_folder(&self.export())?;
        remove_folder(&self.export_sources())
    }

    /// Remove the download cache but keep its metadata
    pub fn download_remove(&self) -> Result<()> {
        remove_downloads(&self.download_export())
    }

    /// Remove the whole entry
    pub fn remove(&self) -> Result<()> {
        remove_folder(&self.base_folder)
    }
}

/// Folder of one package revision, or of a staged build
#[derive(Debug, Clone)]
pub struct PackageLayout {
    reference: PkgReference,
    base_folder: PathBuf,
    build_id: Option<String>,
}

impl PackageLayout {
    pub fn new(reference: PkgReference, base_folder: impl Into<PathBuf>) -> Self {
        Self {
            reference,
            base_folder: base_folder.into(),
            build_id: None,
        }
    }

    pub fn reference(&self) -> &PkgReference {
        &self.reference
    }

    /// Pin the staged package to the revision computed from its binaries
    pub fn set_revision(&mut self, revision: &str) {
        self.reference.revision = Some(revision.to_string());
        self.reference.timestamp = None;
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: f64) {
        self.reference.timestamp = Some(timestamp);
    }

    pub(crate) fn relocate(&mut self, base_folder: PathBuf) {
        self.base_folder = base_folder;
    }

    /// Build that produced this package, recorded on commit
    pub fn build_id(&self) -> Option<&str> {
        self.build_id.as_deref()
    }

    pub fn set_build_id(&mut self, build_id: Option<&str>) {
        self.build_id = build_id.map(str::to_string);
    }

    pub fn base_folder(&self) -> &Path {
        &self.base_folder
    }

    pub fn build(&self) -> PathBuf {
        self.base_folder.join(BUILD_FOLDER)
    }

    pub fn package(&self) -> PathBuf {
        self.base_folder.join(PACKAGES_FOLDER)
    }

    pub fn download_package(&self) -> PathBuf {
        self.base_folder.join(DOWNLOAD_FOLDER)
    }

    pub fn metadata(&self) -> PathBuf {
        self.download_package().join(METADATA_FOLDER)
    }

    pub fn build_remove(&self) -> Result<()> {
        remove_folder(&self.build())
    }

    pub fn package_remove(&self) -> Result<()> {
        remove_folder(&self.package())
    }

    /// Remove the download cache but keep its metadata
    pub fn download_remove(&self) -> Result<()> {
        remove_downloads(&self.download_package())
    }

    /// Remove the whole entry
    pub fn remove(&self) -> Result<()> {
        remove_folder(&self.base_folder)
    }
}

fn remove_downloads(download: &Path) -> Result<()> {
    let entries = match fs::read_dir(download) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        if entry.file_name() == METADATA_FOLDER {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            remove_folder(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
