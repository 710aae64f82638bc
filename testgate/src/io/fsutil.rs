//! Small filesystem helpers shared by the cache and the config writer.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Replace `path` with `contents` so readers see the old or the new file, never
/// a partial one.
///
/// The data goes to a hidden sibling first and is renamed over `path`. Missing
/// parent directories are created.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let staging = staging_path(path)?;
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&staging, contents).with_context(|| format!("write {}", staging.display()))?;
    if let Err(err) = fs::rename(&staging, path) {
        if let Err(cleanup) = fs::remove_file(&staging) {
            debug!(path = %staging.display(), err = %cleanup, "staging file left behind");
        }
        return Err(err).with_context(|| format!("rename onto {}", path.display()));
    }
    Ok(())
}

/// `dir/name` becomes `dir/.name.tmp`.
fn staging_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("{} does not name a file", path.display()))?;
    let mut staged = std::ffi::OsString::from(".");
    staged.push(name);
    staged.push(".tmp");
    Ok(path.with_file_name(staged))
}
