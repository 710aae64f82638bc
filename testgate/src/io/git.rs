//! Git adapter for repository fingerprinting.
//!
//! The cache only ever reads version-control state, so this is a small,
//! explicit wrapper around the handful of `git` queries it needs.

use std::path::PathBuf;
use std::process::{Command, Output};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument};

/// Failure to read version-control state.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("not inside a git work tree: {}", path.display())]
    NotARepository { path: PathBuf },
    #[error("git {args} failed: {stderr}")]
    Query { args: String, stderr: String },
    #[error("spawn git {args}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },
}

/// Source of the repository state a cache entry is bound to.
///
/// Implemented by [`Git`]; tests substitute a fixed state.
pub trait RepoState {
    /// Stable identity of the repository (never depends on its content).
    fn identity(&self) -> String;

    /// `"<commitHash>:<diffHash>"` for the current content.
    fn fingerprint(&self) -> Result<String, VcsError>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Absolute path of the work tree root.
    pub fn toplevel(&self) -> Result<PathBuf, VcsError> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Full object id of HEAD.
    pub fn head(&self) -> Result<String, VcsError> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Unstaged diff followed by staged diff, binary patches included.
    pub fn uncommitted_diff(&self) -> Result<Vec<u8>, VcsError> {
        let mut diff = self.run_checked(&["diff", "--binary"])?.stdout;
        diff.extend(self.run_checked(&["diff", "--cached", "--binary"])?.stdout);
        Ok(diff)
    }

    /// Commit plus a digest of every uncommitted change to tracked files.
    #[instrument(skip_all)]
    pub fn state(&self) -> Result<String, VcsError> {
        let head = self.head()?;
        let diff = self.uncommitted_diff()?;
        let digest = hex::encode(Sha256::digest(&diff));
        debug!(head = %head, diff_bytes = diff.len(), "computed repository state");
        Ok(format!("{head}:{digest}"))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output, VcsError> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("not a git repository") {
                return Err(VcsError::NotARepository {
                    path: self.workdir.clone(),
                });
            }
            return Err(VcsError::Query {
                args: args.join(" "),
                stderr,
            });
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output, VcsError> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|source| VcsError::Spawn {
                args: args.join(" "),
                source,
            })
    }
}

impl RepoState for Git {
    /// The canonical working directory, i.e. the module being tested.
    ///
    /// Modules in different directories of one work tree get separate slots.
    fn identity(&self) -> String {
        let path = self
            .workdir
            .canonicalize()
            .unwrap_or_else(|_| self.workdir.clone());
        path.to_string_lossy().into_owned()
    }

    fn fingerprint(&self) -> Result<String, VcsError> {
        self.state()
    }
}
