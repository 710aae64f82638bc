//! Named textual patterns recognized in toolchain output.
//!
//! Every string match the orchestrator and the stream filter rely on lives in
//! [`PATTERNS`], paired with the effect a match has on classification. Keeping
//! them in one table lets each pattern be tested on its own instead of being
//! buried in control flow.

use std::sync::LazyLock;

use regex::Regex;

/// Effect a matching line has on classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// A package finished with all tests passing.
    PackagePassed,
    /// A package finished with at least one failure.
    PackageFailed,
    /// A package has no test files; excluded from coverage.
    NoTestFiles,
    /// Nothing matched for the current target (treated as a pass).
    NoPackages,
    /// A single test failed.
    TestFailed,
    /// A test binary panicked.
    Panic,
    /// The race detector reported a data race.
    RaceDetected,
    /// End of a race detector report block.
    RaceBlockEnd,
    /// Compiler or vet diagnostic pointing at a source location.
    Diagnostic,
    /// Build or setup of a test binary failed.
    BuildFailed,
    /// Known-harmless vet warning.
    VetNoise,
    /// Verbose per-test bookkeeping (`=== RUN` and friends).
    TestStarted,
    /// A single test passed or was skipped.
    TestPassed,
    /// Bare `PASS`/`FAIL` trailer printed before a package summary.
    Trailer,
    /// Standalone coverage report line.
    CoverageLine,
}

/// A regex with a stable name and the effect it carries.
#[derive(Debug)]
pub struct NamedPattern {
    pub name: &'static str,
    pub regex: Regex,
    pub effect: Effect,
}

fn pattern(name: &'static str, source: &str, effect: Effect) -> NamedPattern {
    NamedPattern {
        name,
        // Sources are literals below and covered by `every_pattern_compiles`.
        regex: Regex::new(source).unwrap_or_else(|err| panic!("pattern {name}: {err}")),
        effect,
    }
}

/// The classification table, in priority order.
pub static PATTERNS: LazyLock<Vec<NamedPattern>> = LazyLock::new(|| {
    vec![
        pattern("package_ok", r"^ok\s+\S+", Effect::PackagePassed),
        pattern("package_fail", r"^FAIL\s+\S+", Effect::PackageFailed),
        pattern("no_test_files", r"\[no test files\]", Effect::NoTestFiles),
        pattern(
            "matched_no_packages",
            r"matched no packages",
            Effect::NoPackages,
        ),
        pattern("no_packages_to_vet", r"no packages to vet", Effect::NoPackages),
        pattern(
            "build_constraints_exclude",
            r"build constraints exclude all Go files",
            Effect::NoPackages,
        ),
        pattern("test_fail", r"^\s*--- FAIL:", Effect::TestFailed),
        pattern("panic", r"^panic:", Effect::Panic),
        pattern("data_race", r"WARNING: DATA RACE", Effect::RaceDetected),
        pattern("race_block_end", r"^={10,}\s*$", Effect::RaceBlockEnd),
        pattern("build_failed", r"\[(build|setup) failed\]", Effect::BuildFailed),
        pattern(
            "unsafe_pointer_noise",
            r"possible misuse of unsafe\.Pointer",
            Effect::VetNoise,
        ),
        pattern(
            "source_diagnostic",
            r"^\S+\.go:\d+(:\d+)?:",
            Effect::Diagnostic,
        ),
        pattern(
            "test_started",
            r"^=== (RUN|PAUSE|CONT|NAME)\b",
            Effect::TestStarted,
        ),
        pattern("test_pass", r"^\s*--- (PASS|SKIP):", Effect::TestPassed),
        pattern("trailer", r"^(PASS|FAIL)\s*$", Effect::Trailer),
        pattern("coverage_line", r"^coverage:\s", Effect::CoverageLine),
    ]
});

/// Coverage percentage as printed by `go test -cover`.
pub static COVERAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"coverage:\s+(\d+(?:\.\d+)?)%").unwrap_or_else(|err| panic!("coverage: {err}"))
});

/// First effect whose pattern matches `line`, in table order.
pub fn classify(line: &str) -> Option<Effect> {
    PATTERNS
        .iter()
        .find(|p| p.regex.is_match(line))
        .map(|p| p.effect)
}

/// True if any pattern carrying `effect` matches `line`.
pub fn matches(line: &str, effect: Effect) -> bool {
    PATTERNS
        .iter()
        .filter(|p| p.effect == effect)
        .any(|p| p.regex.is_match(line))
}

/// True if any line of `text` matches a pattern carrying `effect`.
pub fn any_line(text: &str, effect: Effect) -> bool {
    text.lines().any(|line| matches(line, effect))
}

/// Look up a pattern by name.
pub fn by_name(name: &str) -> Option<&'static NamedPattern> {
    PATTERNS.iter().find(|p| p.name == name)
}
