// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn pattern_arg() -> Arg {
    Arg::new("pattern").help("Reference pattern, e.g. \"zlib/*\" (default: everything)")
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn build_cli() -> Command {
    Command::new("conan-cache")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Conan Cache Contributors")
        .about("Inspect and maintain a Conan package cache")
        .subcommand_required(false)
        .arg(
            Arg::new("cache_folder")
                .long("cache-folder")
                .value_name("DIR")
                .global(true)
                .help("Cache folder (default: $CONAN_CACHE_STORAGE, $CONAN_HOME/p or ~/.conan2/p)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Debug logging (RUST_LOG takes precedence)"),
        )
        .subcommand(
            Command::new("list")
                .about("List cached recipes")
                .arg(pattern_arg())
                .arg(flag("revisions", "Show every recipe revision"))
                .arg(flag("packages", "Show the packages of each revision"))
                .arg(flag("json", "Print JSON instead of text")),
        )
        .subcommand(
            Command::new("path")
                .about("Print the folder of a recipe or package reference")
                .arg(
                    Arg::new("reference")
                        .required(true)
                        .help("Recipe (name/version[#rrev]) or package (recipe:package_id[#prev]) reference"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove a recipe with all its packages, or a single package")
                .arg(
                    Arg::new("reference")
                        .required(true)
                        .help("Recipe or package reference; without revision every revision goes"),
                ),
        )
        .subcommand(
            Command::new("clean")
                .about("Free disk space without removing any cached identity")
                .arg(pattern_arg())
                .arg(flag("source", "Remove unpacked sources"))
                .arg(flag("build", "Remove build folders"))
                .arg(flag("download", "Remove download caches"))
                .arg(flag("temp", "Remove abandoned staging folders")),
        )
        .subcommand(
            Command::new("check-integrity")
                .about("Verify recipe exports and packages against their manifests")
                .arg(pattern_arg()),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("conan-cache.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
