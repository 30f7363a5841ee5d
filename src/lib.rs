// src/lib.rs

//! Conan Package Cache
//!
//! Revision-aware local store for Conan recipes and package binaries,
//! safe to share between threads and processes.
//!
//! # Architecture
//!
//! - Index-backed: every committed revision has one SQLite row pointing at
//!   its folder, relative to the cache root
//! - Content-addressed folders: folder names derive from the exact
//!   revision, so a revision always lands in the same place
//! - Staged commits: work happens in a unique temporary folder that is
//!   moved into place before the index learns about it
//! - Latest by timestamp: committing or touching a revision makes it latest
//! - Build ids: one build can be reused for several package ids

pub mod cache;
pub mod config;
pub mod db;
mod error;
pub mod hash;
pub mod reference;
pub mod version;

pub use cache::{CleanOptions, CleanReport, FileManifest, PackageLayout, PkgCache, RecipeLayout};
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use reference::{PkgReference, RecipeReference};
pub use version::Version;
