// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conan_cache::cache::{check_integrity, clean};
use conan_cache::{
    CacheConfig, CleanOptions, Error, PkgCache, PkgReference, RecipeReference,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "conan-cache")]
#[command(author, version, about = "Inspect and maintain a Conan package cache", long_about = None)]
struct Cli {
    /// Cache folder (default: $CONAN_CACHE_STORAGE, $CONAN_HOME/p or ~/.conan2/p)
    #[arg(long, global = true)]
    cache_folder: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached recipes
    List {
        /// Reference pattern, e.g. "zlib/*" (default: everything)
        pattern: Option<String>,
        /// Show every recipe revision
        #[arg(long)]
        revisions: bool,
        /// Show the packages of each revision
        #[arg(long)]
        packages: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the folder of a recipe or package reference
    Path {
        /// Recipe (name/version[#rrev]) or package (recipe:package_id[#prev]) reference
        reference: String,
    },
    /// Remove a recipe with all its packages, or a single package
    Remove {
        /// Recipe or package reference; without revision every revision goes
        reference: String,
    },
    /// Free disk space without removing any cached identity
    Clean {
        /// Reference pattern (default: everything)
        pattern: Option<String>,
        /// Remove unpacked sources
        #[arg(long)]
        source: bool,
        /// Remove build folders
        #[arg(long)]
        build: bool,
        /// Remove download caches
        #[arg(long)]
        download: bool,
        /// Remove abandoned staging folders
        #[arg(long)]
        temp: bool,
    },
    /// Verify recipe exports and packages against their manifests
    CheckIntegrity {
        /// Reference pattern (default: everything)
        pattern: Option<String>,
    },
}

#[derive(Serialize)]
struct ListedRecipe {
    reference: String,
    revisions: Vec<ListedRevision>,
}

#[derive(Serialize)]
struct ListedRevision {
    revision: String,
    timestamp: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    packages: Vec<ListedPackage>,
}

#[derive(Serialize)]
struct ListedPackage {
    package_id: String,
    revision: String,
    timestamp: f64,
}

enum CliReference {
    Recipe(RecipeReference),
    Package(PkgReference),
}

fn parse_reference(text: &str) -> Result<CliReference> {
    if text.contains(':') {
        Ok(CliReference::Package(PkgReference::loads(text)?))
    } else {
        Ok(CliReference::Recipe(RecipeReference::loads(text)?))
    }
}

/// Fill in the latest recipe revision when the package reference has none
fn resolve_recipe_revision(cache: &PkgCache, pref: &PkgReference) -> Result<PkgReference> {
    if pref.recipe.revision.is_some() {
        return Ok(pref.clone());
    }
    let recipe = cache
        .get_latest_recipe_reference(&pref.recipe)?
        .with_context(|| format!("Recipe '{}' is not in the cache", pref.recipe))?;
    Ok(PkgReference {
        recipe,
        ..pref.clone()
    })
}

fn list_recipes(
    cache: &PkgCache,
    pattern: &str,
    revisions: bool,
    packages: bool,
) -> Result<Vec<ListedRecipe>> {
    let mut listed = Vec::new();

    for reference in cache.search_recipes(pattern)? {
        let mut rrevs = cache.get_recipe_revisions_references(&reference)?;
        if !revisions {
            rrevs.truncate(1);
        }

        let mut entries = Vec::new();
        for rrev in rrevs {
            let package_refs = if packages {
                cache.get_package_references(&rrev, !revisions)?
            } else {
                Vec::new()
            };
            entries.push(ListedRevision {
                revision: rrev.revision.clone().unwrap_or_default(),
                timestamp: rrev.timestamp.unwrap_or_default(),
                packages: package_refs
                    .into_iter()
                    .map(|pref| ListedPackage {
                        package_id: pref.package_id,
                        revision: pref.revision.unwrap_or_default(),
                        timestamp: pref.timestamp.unwrap_or_default(),
                    })
                    .collect(),
            });
        }

        listed.push(ListedRecipe {
            reference: reference.to_string(),
            revisions: entries,
        });
    }

    Ok(listed)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let mut config = CacheConfig::from_env();
    if let Some(folder) = cli.cache_folder {
        config.base_folder = folder;
    }

    match cli.command {
        Some(Commands::List {
            pattern,
            revisions,
            packages,
            json,
        }) => {
            let cache = PkgCache::open(config)?;
            let pattern = pattern.unwrap_or_else(|| "*".to_string());
            let listed = list_recipes(&cache, &pattern, revisions, packages)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&listed)?);
                return Ok(());
            }

            if listed.is_empty() {
                println!("No recipes found matching '{}'", pattern);
                return Ok(());
            }

            for recipe in &listed {
                println!("{}", recipe.reference);
                for revision in &recipe.revisions {
                    println!("  #{} ({})", revision.revision, revision.timestamp);
                    for package in &revision.packages {
                        println!(
                            "    {}#{} ({})",
                            package.package_id, package.revision, package.timestamp
                        );
                    }
                }
            }
            Ok(())
        }
        Some(Commands::Path { reference }) => {
            let cache = PkgCache::open(config)?;

            let folder = match parse_reference(&reference)? {
                CliReference::Recipe(rref) => cache.get_recipe_layout(&rref)?.base_folder().to_path_buf(),
                CliReference::Package(pref) => {
                    let pref = resolve_recipe_revision(&cache, &pref)?;
                    let pref = match pref.revision {
                        Some(_) => pref,
                        None => cache
                            .get_latest_package_reference(&pref)?
                            .with_context(|| format!("Package '{}' is not in the cache", pref))?,
                    };
                    cache.get_package_layout(&pref)?.base_folder().to_path_buf()
                }
            };

            println!("{}", folder.display());
            Ok(())
        }
        Some(Commands::Remove { reference }) => {
            let cache = PkgCache::open(config)?;

            match parse_reference(&reference)? {
                CliReference::Recipe(rref) => {
                    let rrevs = match rref.revision {
                        Some(_) => vec![rref.clone()],
                        None => cache.get_recipe_revisions_references(&rref)?,
                    };
                    if rrevs.is_empty() {
                        return Err(anyhow::anyhow!("Recipe '{}' is not in the cache", rref));
                    }
                    for rrev in &rrevs {
                        let layout = cache.get_registered_recipe_layout(rrev)?;
                        info!("Removing {}", rrev.repr_notime());
                        cache.remove_recipe(&layout)?;
                    }
                    println!("Removed {} revision(s) of {}", rrevs.len(), rref);
                }
                CliReference::Package(pref) => {
                    let pref = resolve_recipe_revision(&cache, &pref)?;
                    let prevs = cache.get_package_revisions_references(&pref, false)?;
                    if prevs.is_empty() {
                        return Err(anyhow::anyhow!("Package '{}' is not in the cache", pref));
                    }
                    for prev in &prevs {
                        let layout = cache.get_registered_package_layout(prev)?;
                        cache.remove_package(&layout)?;
                    }
                    println!("Removed {} revision(s) of {}", prevs.len(), pref);
                }
            }
            Ok(())
        }
        Some(Commands::Clean {
            pattern,
            source,
            build,
            download,
            temp,
        }) => {
            let cache = PkgCache::open(config)?;
            let options = CleanOptions {
                source,
                build,
                download,
                temp,
            }
            .or_all();

            let pattern = pattern.unwrap_or_else(|| "*".to_string());
            let report = clean(&cache, &pattern, options)?;

            println!("Cleaned {} recipe revision(s)", report.recipes);
            println!("  Packages: {}", report.packages);
            println!("  Staging folders removed: {}", report.temp_folders);
            if !report.dangling.is_empty() {
                println!("  Entries with missing folders:");
                for entry in &report.dangling {
                    println!("    {}", entry);
                }
            }
            Ok(())
        }
        Some(Commands::CheckIntegrity { pattern }) => {
            let cache = PkgCache::open(config)?;
            let pattern = pattern.unwrap_or_else(|| "*".to_string());
            let references = cache.search_recipes(&pattern)?;

            match check_integrity(&cache, &references) {
                Ok(()) => {
                    println!("Integrity check passed for {} reference(s)", references.len());
                    Ok(())
                }
                Err(Error::IntegrityMismatch(problems)) => {
                    println!("Integrity check failed:");
                    for problem in &problems {
                        println!("  {}", problem);
                    }
                    Err(anyhow::anyhow!("{} integrity problem(s) found", problems.len()))
                }
                Err(e) => Err(e.into()),
            }
        }
        None => {
            println!("Conan package cache v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'conan-cache --help' for usage information");
            Ok(())
        }
    }
}
