//! Test-only fakes for the toolchain, repository state and badge seams.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::io::badges::{BadgeReport, BadgeUpdater, SideEffect};
use crate::io::git::{RepoState, VcsError};
use crate::io::process::CommandOutput;
use crate::io::toolchain::Toolchain;

/// Canned `go test` transcripts.
pub mod fixtures {
    /// Two packages at 80% and 60%, one without tests.
    pub const PASSING_NATIVE: &str = "\
ok  \texample.com/widget\t0.012s\tcoverage: 80.0% of statements
ok  \texample.com/widget/store\t0.020s\tcoverage: 60.0% of statements
?   \texample.com/widget/cmd\t[no test files]
";

    /// One failing package, one passing at 75%.
    pub const FAILING_NATIVE: &str = "\
--- FAIL: TestSpin (0.00s)
    spin_test.go:14: expected 3, got 2
FAIL
FAIL\texample.com/widget\t0.015s
ok  \texample.com/widget/store\t0.020s\tcoverage: 75.0% of statements
FAIL
";

    pub const RACY_NATIVE: &str = "\
==================
WARNING: DATA RACE
Write at 0x00c000012345 by goroutine 8:
  example.com/widget.(*Counter).Inc()
      /src/widget/counter.go:12 +0x44
==================
--- FAIL: TestCounter (0.01s)
    testing.go:1465: race detected during execution of test
FAIL
FAIL\texample.com/widget\t0.030s
FAIL
";

    /// Every package is gated to the alternate target.
    pub const EXCLUDED_NATIVE: &str =
        "package example.com/widget: build constraints exclude all Go files in /src/widget\n";

    pub const PASSING_ALTERNATE: &str = "\
=== RUN   TestRender
--- PASS: TestRender (0.01s)
PASS
coverage: 55.0% of statements
ok  \texample.com/widget/web\t1.234s\tcoverage: 55.0% of statements
";
}

/// Repository state with a settable fingerprint.
///
/// Clones share state so a test can mutate the fingerprint seen by a cache.
#[derive(Debug, Clone)]
pub struct FixedState {
    identity: String,
    fingerprint: Arc<Mutex<Option<String>>>,
}

impl FixedState {
    pub fn new(identity: &str, fingerprint: &str) -> Self {
        Self {
            identity: identity.to_string(),
            fingerprint: Arc::new(Mutex::new(Some(fingerprint.to_string()))),
        }
    }

    pub fn set_fingerprint(&self, fingerprint: &str) {
        *self.fingerprint.lock().expect("fingerprint lock") = Some(fingerprint.to_string());
    }

    /// Make every subsequent fingerprint query fail.
    pub fn fail_fingerprint(&self) {
        *self.fingerprint.lock().expect("fingerprint lock") = None;
    }
}

impl RepoState for FixedState {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn fingerprint(&self) -> Result<String, VcsError> {
        self.fingerprint
            .lock()
            .expect("fingerprint lock")
            .clone()
            .ok_or_else(|| VcsError::Query {
                args: "rev-parse HEAD".to_string(),
                stderr: "scripted failure".to_string(),
            })
    }
}

type Scripted = Result<CommandOutput, String>;

/// Toolchain that returns canned output and records which operations ran.
#[derive(Debug)]
pub struct ScriptedToolchain {
    module: Option<String>,
    version: Option<String>,
    vet: Scripted,
    listing: Scripted,
    native: Scripted,
    alternate: Scripted,
    shim_present: bool,
    install_ok: bool,
    vet_delay: Duration,
    listing_delay: Duration,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedToolchain {
    /// Clean vet, no alternate packages, passing native tests at 70%.
    pub fn passing() -> Self {
        Self {
            module: Some("example.com/widget".to_string()),
            version: Some("1.22.3".to_string()),
            vet: Ok(CommandOutput::exited(0, "")),
            listing: Ok(CommandOutput::exited(0, "")),
            native: Ok(CommandOutput::exited(0, fixtures::PASSING_NATIVE)),
            alternate: Ok(CommandOutput::exited(0, fixtures::PASSING_ALTERNATE)),
            shim_present: true,
            install_ok: true,
            vet_delay: Duration::ZERO,
            listing_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_vet(mut self, out: CommandOutput) -> Self {
        self.vet = Ok(out);
        self
    }

    pub fn with_listing(mut self, out: CommandOutput) -> Self {
        self.listing = Ok(out);
        self
    }

    pub fn with_listing_error(mut self, err: &str) -> Self {
        self.listing = Err(err.to_string());
        self
    }

    pub fn with_native(mut self, out: CommandOutput) -> Self {
        self.native = Ok(out);
        self
    }

    pub fn with_native_error(mut self, err: &str) -> Self {
        self.native = Err(err.to_string());
        self
    }

    pub fn with_alternate(mut self, out: CommandOutput) -> Self {
        self.alternate = Ok(out);
        self
    }

    /// Behave as if `go.mod` were missing.
    pub fn without_module(mut self) -> Self {
        self.module = None;
        self
    }

    /// Report the shim missing; `install_succeeds` decides the install outcome.
    pub fn without_shim(mut self, install_succeeds: bool) -> Self {
        self.shim_present = false;
        self.install_ok = install_succeeds;
        self
    }

    /// Sleep inside the discovery operations.
    pub fn with_delays(mut self, vet: Duration, listing: Duration) -> Self {
        self.vet_delay = vet;
        self.listing_delay = listing;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls().iter().any(|call| *call == name)
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().expect("calls lock").push(name);
    }

    fn replay(script: &Scripted) -> Result<CommandOutput> {
        script.clone().map_err(|err| anyhow!(err))
    }

    /// Feed output in small uneven chunks so line reassembly is exercised.
    fn stream(script: &Scripted, on_chunk: &mut dyn FnMut(&str)) -> Result<CommandOutput> {
        let out = Self::replay(script)?;
        let mut rest = out.output.as_str();
        let mut size = 5;
        while !rest.is_empty() {
            let mut end = size.min(rest.len());
            while !rest.is_char_boundary(end) {
                end += 1;
            }
            on_chunk(&rest[..end]);
            rest = &rest[end..];
            size = if size == 5 { 11 } else { 5 };
        }
        Ok(out)
    }
}

impl Toolchain for ScriptedToolchain {
    fn module_path(&self) -> Result<String> {
        self.module
            .clone()
            .ok_or_else(|| anyhow!("go.mod not found"))
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }

    fn vet(&self) -> Result<CommandOutput> {
        self.record("vet");
        thread::sleep(self.vet_delay);
        Self::replay(&self.vet)
    }

    fn list_alternate_test_packages(&self) -> Result<CommandOutput> {
        self.record("list");
        thread::sleep(self.listing_delay);
        Self::replay(&self.listing)
    }

    fn test_native(&self, on_chunk: &mut dyn FnMut(&str)) -> Result<CommandOutput> {
        self.record("test_native");
        Self::stream(&self.native, on_chunk)
    }

    fn shim_present(&self) -> bool {
        self.shim_present
    }

    fn install_shim(&self) -> Result<()> {
        self.record("install_shim");
        if self.install_ok {
            Ok(())
        } else {
            bail!("go install: network unreachable")
        }
    }

    fn test_alternate(&self, on_chunk: &mut dyn FnMut(&str)) -> Result<CommandOutput> {
        self.record("test_alternate");
        Self::stream(&self.alternate, on_chunk)
    }
}

/// Badge updater that records reports instead of writing them.
#[derive(Debug, Default)]
pub struct RecordingBadges {
    reports: Mutex<Vec<BadgeReport>>,
    fail: bool,
}

impl RecordingBadges {
    pub fn failing() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn reports(&self) -> Vec<BadgeReport> {
        self.reports.lock().expect("reports lock").clone()
    }
}

impl BadgeUpdater for RecordingBadges {
    fn update(&self, report: &BadgeReport) -> Result<SideEffect> {
        if self.fail {
            bail!("badge document not writable");
        }
        self.reports.lock().expect("reports lock").push(report.clone());
        Ok(SideEffect::Applied)
    }
}

/// Temporary git repository holding a committed single-file Go module.
#[derive(Debug)]
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// `Ok(None)` when `git` is not installed.
    pub fn new() -> Result<Option<Self>> {
        if Command::new("git").arg("--version").output().is_err() {
            return Ok(None);
        }
        let dir = tempfile::tempdir().context("create temp repo dir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q"])?;
        repo.git(&["config", "user.email", "dev@example.com"])?;
        repo.git(&["config", "user.name", "Dev"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write_file("go.mod", "module example.com/widget\n\ngo 1.22\n")?;
        repo.write_file("lib.go", "package lib\n")?;
        repo.git(&["add", "-A"])?;
        repo.git(&["commit", "-q", "-m", "initial"])?;
        Ok(Some(repo))
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// Run git in the repository, failing on non-zero exit.
    pub fn git(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output)
    }
}
