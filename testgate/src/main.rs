//! Cache-gated Go test runner.
//!
//! Runs `go vet` and the module's tests, and remembers a fully successful
//! result for the exact repository content so an unchanged tree is not tested
//! twice.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use testgate::exit_codes;
use testgate::gate::{CacheMode, run_gated};
use testgate::io::badges::MarkdownBadges;
use testgate::io::cache::ResultCache;
use testgate::io::config::{CONFIG_FILE_NAME, GateConfig, init_config, load_config};
use testgate::io::git::Git;
use testgate::io::toolchain::GoToolchain;
use testgate::logging;
use testgate::orchestrator::CycleOptions;

#[derive(Parser)]
#[command(
    name = "testgate",
    version,
    about = "Cache-gated test runner for Go modules"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a `.testgate.toml` with every default into the current directory.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Vet and test the module unless a cached pass matches the current content.
    Run {
        /// Run even if a cached pass matches; the new result is still recorded.
        #[arg(long)]
        no_cache: bool,
        /// Show all test output and debug logs.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Exit 0 if a cached pass matches the current content, 3 otherwise.
    Status,
    /// Delete the cached result for this module.
    Invalidate,
    /// Print the cache key and, inside a repository, the content fingerprint.
    Key,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init(matches!(cli.command, Command::Run { verbose: true, .. }));

    let workdir = env::current_dir().context("resolve current directory")?;

    match cli.command {
        Command::Init { force } => cmd_init(&workdir, force),
        Command::Run { no_cache, verbose } => {
            let (config, cache) = open(&workdir)?;
            Ok(cmd_run(&workdir, &config, &cache, no_cache, verbose))
        }
        Command::Status => {
            let (_, cache) = open(&workdir)?;
            Ok(cmd_status(&cache))
        }
        Command::Invalidate => {
            let (_, cache) = open(&workdir)?;
            cache.invalidate();
            Ok(exit_codes::OK)
        }
        Command::Key => {
            let (_, cache) = open(&workdir)?;
            Ok(cmd_key(&cache))
        }
    }
}

/// Load the config that applies to `workdir` and the cache it points at.
fn open(workdir: &Path) -> Result<(GateConfig, ResultCache<Git>)> {
    let git = Git::new(workdir);
    let root = git.toplevel().unwrap_or_else(|_| workdir.to_path_buf());
    let config = load_config(&config_path(workdir, &root))?;
    let cache = ResultCache::new(git, config.cache_dir());
    Ok((config, cache))
}

fn cmd_init(workdir: &Path, force: bool) -> Result<i32> {
    let path = workdir.join(CONFIG_FILE_NAME);
    init_config(&path, force)?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

/// Run the cycle for the module in `module_dir` (the invocation directory).
fn cmd_run(
    module_dir: &Path,
    config: &GateConfig,
    cache: &ResultCache<Git>,
    no_cache: bool,
    verbose: bool,
) -> i32 {
    let toolchain = GoToolchain::new(module_dir, config);
    let badges = config
        .badges
        .enabled
        .then(|| MarkdownBadges::new(badge_document(module_dir, &config.badges.document)));
    let sink = |line: &str| eprintln!("{line}");
    let options = CycleOptions {
        alternate_label: config.alternate.label.clone(),
        license: config.badges.license.clone(),
        quiet: !verbose,
        on_line: Some(&sink),
    };
    let mode = if no_cache {
        CacheMode::Refresh
    } else {
        CacheMode::ReadWrite
    };

    let outcome = run_gated(
        config.cache.enabled.then_some(cache),
        mode,
        &toolchain,
        badges.as_ref(),
        &options,
    );
    println!("{}", outcome.summary);
    if outcome.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}

fn cmd_status(cache: &ResultCache<Git>) -> i32 {
    if cache.is_valid() {
        println!("valid");
        exit_codes::OK
    } else {
        println!("stale");
        exit_codes::STALE
    }
}

fn cmd_key(cache: &ResultCache<Git>) -> i32 {
    println!("{}", cache.cache_key());
    if let Ok(fingerprint) = cache.git_state() {
        println!("{fingerprint}");
    }
    exit_codes::OK
}

/// `.testgate.toml` next to the module, else at the work tree root.
fn config_path(workdir: &Path, root: &Path) -> PathBuf {
    let local = workdir.join(CONFIG_FILE_NAME);
    if local.exists() {
        local
    } else {
        root.join(CONFIG_FILE_NAME)
    }
}

fn badge_document(module_dir: &Path, document: &Path) -> PathBuf {
    if document.is_absolute() {
        document.to_path_buf()
    } else {
        module_dir.join(document)
    }
}
