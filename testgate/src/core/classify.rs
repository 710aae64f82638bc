//! Phase verdicts derived from captured toolchain output.
//!
//! Pure functions: they see the exit status and text of a finished process and
//! decide what it means, without running anything.

use crate::core::patterns::{Effect, any_line, matches};

/// Verdict of the static-analysis phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VetVerdict {
    Clean,
    /// Remaining diagnostics after noise filtering.
    Issues(Vec<String>),
}

/// Classify `go vet` output.
///
/// A failing run that only complains about there being nothing to vet counts
/// as clean, as does one whose only diagnostics are known noise.
pub fn classify_vet(success: bool, output: &str) -> VetVerdict {
    if success || any_line(output, Effect::NoPackages) {
        return VetVerdict::Clean;
    }

    let remaining: Vec<String> = output
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter(|line| !matches(line, Effect::VetNoise))
        .map(str::to_string)
        .collect();

    if remaining.is_empty() {
        VetVerdict::Clean
    } else {
        VetVerdict::Issues(remaining)
    }
}

/// Verdict of the primary (native target) test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryVerdict {
    Passed,
    /// Nothing applicable for the native target; every test is gated to the
    /// alternate target.
    NoApplicableTests,
    Failed { race: bool },
}

/// What the primary test output says beyond its exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryScan {
    /// At least one package printed an `ok` or `FAIL` summary line.
    pub packages_ran: bool,
    /// An exclusion message ("matched no packages" and similar) was printed.
    pub excluded: bool,
    pub race: bool,
}

pub fn scan_primary(output: &str) -> PrimaryScan {
    let mut scan = PrimaryScan {
        packages_ran: false,
        excluded: false,
        race: false,
    };
    for line in output.lines() {
        if matches(line, Effect::PackagePassed) || matches(line, Effect::PackageFailed) {
            scan.packages_ran = true;
        }
        if matches(line, Effect::NoPackages) {
            scan.excluded = true;
        }
        if matches(line, Effect::RaceDetected) {
            scan.race = true;
        }
    }
    scan
}

/// Classify the primary test run.
pub fn classify_primary(success: bool, output: &str) -> PrimaryVerdict {
    let scan = scan_primary(output);
    if !scan.packages_ran && scan.excluded {
        PrimaryVerdict::NoApplicableTests
    } else if success && !scan.race {
        PrimaryVerdict::Passed
    } else {
        PrimaryVerdict::Failed { race: scan.race }
    }
}

/// Whether coverage numbers from this run are meaningful.
pub fn coverage_applies(success: bool, output: &str) -> bool {
    success || scan_primary(output).packages_ran
}

/// Import paths printed by the alternate-target package listing.
///
/// The listing may exit non-zero while still printing packages (import errors
/// under the alternate target), so only the line shape is trusted: error lines
/// always carry a `:` or a space, import paths never do.
pub fn alternate_test_packages(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains(':') && !line.contains(' '))
        .map(str::to_string)
        .collect()
}
