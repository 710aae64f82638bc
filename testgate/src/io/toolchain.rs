//! Build-system adapter.
//!
//! The [`Toolchain`] trait is everything the orchestrator needs from the build
//! system. [`GoToolchain`] drives the `go` command; tests use scripted
//! toolchains that return canned output without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{AlternateConfig, GateConfig, TimeoutConfig};
use crate::io::process::{CommandOutput, run_command, run_command_streaming};

/// Operations the orchestrator runs against the build system.
///
/// Implementations must be shareable across the discovery threads.
pub trait Toolchain: Sync {
    /// Module path declared by the project (used in failure messages).
    fn module_path(&self) -> Result<String>;

    /// Human-readable toolchain version for badges, if it can be determined.
    fn version(&self) -> Option<String>;

    /// Whole-module static analysis.
    fn vet(&self) -> Result<CommandOutput>;

    /// List packages that carry test files under the alternate target.
    fn list_alternate_test_packages(&self) -> Result<CommandOutput>;

    /// Native test run with race detection and coverage, streamed to `on_chunk`.
    fn test_native(&self, on_chunk: &mut dyn FnMut(&str)) -> Result<CommandOutput>;

    /// Whether the alternate-target execution shim is available.
    fn shim_present(&self) -> bool;

    /// Install the execution shim.
    fn install_shim(&self) -> Result<()>;

    /// Alternate-target test run through the shim, streamed to `on_chunk`.
    fn test_alternate(&self, on_chunk: &mut dyn FnMut(&str)) -> Result<CommandOutput>;
}

/// Toolchain backed by the `go` command.
#[derive(Debug, Clone)]
pub struct GoToolchain {
    workdir: PathBuf,
    alternate: AlternateConfig,
    timeouts: TimeoutConfig,
    output_limit_bytes: usize,
}

impl GoToolchain {
    pub fn new(workdir: impl Into<PathBuf>, config: &GateConfig) -> Self {
        Self {
            workdir: workdir.into(),
            alternate: config.alternate.clone(),
            timeouts: config.timeouts.clone(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn go(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("go");
        cmd.args(args).current_dir(&self.workdir);
        cmd
    }

    fn go_alternate(&self, args: &[&str]) -> Command {
        let mut cmd = self.go(args);
        cmd.env("GOOS", &self.alternate.goos)
            .env("GOARCH", &self.alternate.goarch);
        cmd
    }
}

impl Toolchain for GoToolchain {
    fn module_path(&self) -> Result<String> {
        read_module_path(&self.workdir.join("go.mod"))
    }

    fn version(&self) -> Option<String> {
        let out = run_command(
            self.go(&["version"]),
            self.timeouts.list(),
            self.output_limit_bytes,
        )
        .ok()?;
        if !out.success {
            return None;
        }
        parse_go_version(&out.output)
    }

    #[instrument(skip_all)]
    fn vet(&self) -> Result<CommandOutput> {
        debug!("running go vet");
        run_command(
            self.go(&["vet", "./..."]),
            self.timeouts.vet(),
            self.output_limit_bytes,
        )
    }

    #[instrument(skip_all, fields(goos = %self.alternate.goos, goarch = %self.alternate.goarch))]
    fn list_alternate_test_packages(&self) -> Result<CommandOutput> {
        debug!("listing alternate-target test packages");
        run_command(
            self.go_alternate(&[
                "list",
                "-f",
                "{{if or .TestGoFiles .XTestGoFiles}}{{.ImportPath}}{{end}}",
                "./...",
            ]),
            self.timeouts.list(),
            self.output_limit_bytes,
        )
    }

    #[instrument(skip_all)]
    fn test_native(&self, on_chunk: &mut dyn FnMut(&str)) -> Result<CommandOutput> {
        info!("running native tests with race detection and coverage");
        run_command_streaming(
            self.go(&["test", "-race", "-cover", "-count=1", "./..."]),
            self.timeouts.test(),
            self.output_limit_bytes,
            on_chunk,
        )
    }

    fn shim_present(&self) -> bool {
        which::which(&self.alternate.shim).is_ok()
    }

    #[instrument(skip_all, fields(package = %self.alternate.shim_package))]
    fn install_shim(&self) -> Result<()> {
        info!("installing alternate-target execution shim");
        let out = run_command(
            self.go(&["install", &self.alternate.shim_package]),
            self.timeouts.install(),
            self.output_limit_bytes,
        )?;
        if out.timed_out {
            bail!("go install {} timed out", self.alternate.shim_package);
        }
        if !out.success {
            warn!(output = %out.output.trim(), "shim install failed");
            return Err(anyhow!(
                "go install {} failed: {}",
                self.alternate.shim_package,
                out.output.trim()
            ));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(shim = %self.alternate.shim))]
    fn test_alternate(&self, on_chunk: &mut dyn FnMut(&str)) -> Result<CommandOutput> {
        info!("running alternate-target tests");
        run_command_streaming(
            self.go_alternate(&["test", "-exec", &self.alternate.shim, "-v", "-cover", "./..."]),
            self.timeouts.alternate_test(),
            self.output_limit_bytes,
            on_chunk,
        )
    }
}

/// Read the `module` directive from a `go.mod` file.
pub fn read_module_path(go_mod: &Path) -> Result<String> {
    let contents =
        fs::read_to_string(go_mod).with_context(|| format!("read {}", go_mod.display()))?;
    parse_module_path(&contents)
        .ok_or_else(|| anyhow!("module directive not found in {}", go_mod.display()))
}

fn parse_module_path(contents: &str) -> Option<String> {
    contents.lines().map(str::trim).find_map(|line| {
        let rest = line.strip_prefix("module")?;
        if !rest.starts_with([' ', '\t']) {
            return None;
        }
        let path = rest.trim().trim_matches('"');
        (!path.is_empty()).then(|| path.to_string())
    })
}

/// Extract `1.22.3` from `go version go1.22.3 linux/amd64`.
fn parse_go_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find_map(|word| word.strip_prefix("go").filter(|v| v.starts_with(|c: char| c.is_ascii_digit())))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_module_directive() {
        let go_mod = "// comment\nmodule example.com/widget\n\ngo 1.22\n";
        assert_eq!(
            parse_module_path(go_mod).as_deref(),
            Some("example.com/widget")
        );
    }

    #[test]
    fn parses_quoted_module_directive() {
        assert_eq!(
            parse_module_path("module \"example.com/q\"\n").as_deref(),
            Some("example.com/q")
        );
    }

    #[test]
    fn ignores_lookalike_directives() {
        assert_eq!(parse_module_path("modules x\ngo 1.22\n"), None);
    }

    #[test]
    fn missing_go_mod_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(read_module_path(&temp.path().join("go.mod")).is_err());
    }

    #[test]
    fn reads_go_mod_from_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("go.mod");
        fs::write(&path, "module example.com/disk\n").expect("write");
        assert_eq!(read_module_path(&path).expect("read"), "example.com/disk");
    }

    #[test]
    fn parses_go_version_output() {
        assert_eq!(
            parse_go_version("go version go1.22.3 linux/amd64\n").as_deref(),
            Some("1.22.3")
        );
        assert_eq!(parse_go_version("garbage"), None);
    }
}
