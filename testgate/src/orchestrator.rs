//! Orchestration for one full test cycle.
//!
//! Phases:
//!
//! 0. Discovery: static analysis and the alternate-target package listing run
//!    concurrently and are joined before anything else starts.
//! 1. Native tests with race detection and coverage, streamed through a
//!    [`StreamFilter`].
//! 2. Alternate-target tests, only when discovery found gated packages or the
//!    native run had nothing to execute.
//! 3. Aggregation and the best-effort badge update.
//!
//! Each phase takes the [`TestRunOutcome`] built so far by value and returns
//! the next one. The orchestrator never consults the result cache; see
//! [`crate::gate`].

use std::thread;

use tracing::{debug, info, instrument, warn};

use crate::core::classify::{
    PrimaryVerdict, VetVerdict, alternate_test_packages, classify_primary, classify_vet,
    coverage_applies, scan_primary,
};
use crate::core::coverage::average_coverage;
use crate::core::filter::{FilterReport, StreamFilter};
use crate::core::types::{
    AlternateStatus, RaceStatus, StatusLine, TestRunOutcome, TestStatus, VetStatus,
};
use crate::io::badges::{BadgeReport, BadgeUpdater, SideEffect};
use crate::io::process::CommandOutput;
use crate::io::toolchain::Toolchain;

/// Receives retained output lines as they are produced.
pub type LineSink<'a> = &'a dyn Fn(&str);

/// Knobs for a single cycle.
#[derive(Clone)]
pub struct CycleOptions<'a> {
    /// Name of the alternate target in summary lines.
    pub alternate_label: String,
    /// License shown on the badge.
    pub license: String,
    /// Drop unrecognized output lines, keeping only failures.
    pub quiet: bool,
    /// Live view of retained lines (failures, diagnostics, race reports).
    pub on_line: Option<LineSink<'a>>,
}

impl Default for CycleOptions<'_> {
    fn default() -> Self {
        Self {
            alternate_label: "wasm".to_string(),
            license: "MIT".to_string(),
            quiet: true,
            on_line: None,
        }
    }
}

impl std::fmt::Debug for CycleOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleOptions")
            .field("alternate_label", &self.alternate_label)
            .field("license", &self.license)
            .field("quiet", &self.quiet)
            .field("on_line", &self.on_line.is_some())
            .finish()
    }
}

/// Result of a full cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub outcome: TestRunOutcome,
    /// Rendered summary, one glyph-labeled entry per phase result.
    pub summary: String,
    pub success: bool,
    /// Whether the gate may record this run in the result cache.
    pub cacheable: bool,
    /// Packages found by discovery to carry alternate-target tests.
    pub alternate_packages: Vec<String>,
    pub badges: SideEffect,
}

/// Results of the two discovery tasks. Each task owns one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub vet: VetVerdict,
    pub alternate_packages: Vec<String>,
}

/// Run every phase and aggregate the result.
#[instrument(skip_all)]
pub fn run_cycle<T: Toolchain, B: BadgeUpdater>(
    toolchain: &T,
    badges: Option<&B>,
    options: &CycleOptions<'_>,
) -> CycleReport {
    let module = toolchain.module_path().unwrap_or_else(|err| {
        debug!(err = %format!("{err:#}"), "module path unavailable");
        "current module".to_string()
    });

    let discovery = discover(toolchain);
    let outcome = apply_vet(TestRunOutcome::default(), &discovery.vet, options);

    let (outcome, forced) = primary_phase(toolchain, outcome, &module, options);

    let wants_alternate = forced || !discovery.alternate_packages.is_empty();
    let outcome = if wants_alternate {
        info!(
            packages = discovery.alternate_packages.len(),
            forced, "alternate-target tests required"
        );
        alternate_phase(toolchain, outcome, options)
    } else {
        outcome
    };

    let badges = match badges {
        Some(updater) => {
            let report = BadgeReport {
                license: options.license.clone(),
                toolchain_version: toolchain.version(),
                test: outcome.test,
                coverage_percent: outcome.coverage_percent,
                race: outcome.race,
                vet: outcome.vet,
            };
            updater
                .update(&report)
                .unwrap_or_else(|err| SideEffect::Failed(format!("{err:#}")))
        }
        None => SideEffect::Skipped,
    };
    if let SideEffect::Failed(reason) = &badges {
        warn!(reason = %reason, "badge update failed");
    }

    let summary = outcome.summary();
    let success = outcome.success();
    let cacheable = outcome.cacheable();
    info!(success, cacheable, "test cycle finished");
    CycleReport {
        outcome,
        summary,
        success,
        cacheable,
        alternate_packages: discovery.alternate_packages,
        badges,
    }
}

/// Phase 0: run static analysis and the alternate-target listing side by side.
///
/// Both tasks always run to completion; a failure in one never affects the
/// other's result.
pub fn discover<T: Toolchain>(toolchain: &T) -> Discovery {
    thread::scope(|scope| {
        let vet_task = scope.spawn(|| run_vet(toolchain));
        let listing_task = scope.spawn(|| run_listing(toolchain));

        let vet = vet_task.join().unwrap_or_else(|_| {
            warn!("vet task panicked");
            VetVerdict::Issues(vec!["vet task panicked".to_string()])
        });
        let alternate_packages = listing_task.join().unwrap_or_else(|_| {
            warn!("listing task panicked");
            Vec::new()
        });
        Discovery {
            vet,
            alternate_packages,
        }
    })
}

fn run_vet<T: Toolchain>(toolchain: &T) -> VetVerdict {
    match toolchain.vet() {
        Ok(out) if out.timed_out => VetVerdict::Issues(vec!["go vet timed out".to_string()]),
        Ok(out) => classify_vet(out.success, &out.output),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "static analysis could not run");
            VetVerdict::Issues(vec![format!("{err:#}")])
        }
    }
}

fn run_listing<T: Toolchain>(toolchain: &T) -> Vec<String> {
    match toolchain.list_alternate_test_packages() {
        Ok(out) => {
            let packages = alternate_test_packages(&out.output);
            debug!(count = packages.len(), "alternate-target test packages");
            packages
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "alternate-target listing failed");
            Vec::new()
        }
    }
}

fn apply_vet(
    mut outcome: TestRunOutcome,
    verdict: &VetVerdict,
    options: &CycleOptions<'_>,
) -> TestRunOutcome {
    match verdict {
        VetVerdict::Clean => {
            outcome.vet = VetStatus::Ok;
            outcome.with_message(StatusLine::pass("vet ok"))
        }
        VetVerdict::Issues(lines) => {
            for line in lines {
                warn!(diagnostic = %line, "vet");
                if let Some(sink) = options.on_line {
                    sink(line);
                }
            }
            outcome.vet = VetStatus::Issues;
            outcome.with_message(StatusLine::fail("vet issues found"))
        }
    }
}

fn new_filter<'a>(options: &CycleOptions<'a>) -> StreamFilter<'a> {
    let filter = StreamFilter::new(options.quiet);
    match options.on_line {
        Some(sink) => filter.with_callback(move |line: &str| sink(line)),
        None => filter,
    }
}

/// Phase 1. Returns the updated outcome and whether alternate-target tests
/// must run regardless of discovery.
fn primary_phase<T: Toolchain>(
    toolchain: &T,
    mut outcome: TestRunOutcome,
    module: &str,
    options: &CycleOptions<'_>,
) -> (TestRunOutcome, bool) {
    let mut filter = new_filter(options);
    let result = toolchain.test_native(&mut |chunk: &str| filter.add(chunk));
    let report = filter.finish();
    log_filter_report("native", &report);

    let out = match result {
        Ok(out) => out,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "native tests could not run");
            outcome.test = TestStatus::Failed;
            outcome.race = RaceStatus::Detected;
            let outcome =
                outcome.with_message(StatusLine::fail(format!("test errors found in {module}")));
            return (outcome, false);
        }
    };
    note_truncation("native", &out, options);

    let verdict = if out.timed_out {
        PrimaryVerdict::Failed {
            race: scan_primary(&out.output).race,
        }
    } else {
        classify_primary(out.success, &out.output)
    };

    let mut forced = false;
    match verdict {
        PrimaryVerdict::NoApplicableTests => {
            info!("no native tests ran (module may only have alternate-target tests)");
            outcome.test = TestStatus::Passing;
            outcome.race = RaceStatus::Clean;
            forced = true;
        }
        PrimaryVerdict::Passed => {
            outcome.test = TestStatus::Passing;
            outcome.race = RaceStatus::Clean;
            outcome = outcome
                .with_message(StatusLine::pass("tests ok"))
                .with_message(StatusLine::pass("race detection ok"));
        }
        PrimaryVerdict::Failed { race } => {
            outcome.test = TestStatus::Failed;
            outcome.race = RaceStatus::Detected;
            outcome =
                outcome.with_message(StatusLine::fail(format!("test errors found in {module}")));
            if race {
                outcome = outcome.with_message(StatusLine::fail("data race detected"));
            }
            if out.timed_out {
                outcome = outcome.with_message(StatusLine::fail("tests timed out"));
            }
        }
    }

    if !forced && coverage_applies(out.success, &out.output) {
        outcome.coverage_percent = average_coverage(&out.output);
        if outcome.coverage_percent > 0 {
            let line = StatusLine::pass(format!("coverage: {}%", outcome.coverage_percent));
            outcome = outcome.with_message(line);
        }
    }

    (outcome, forced)
}

/// Phase 2.
fn alternate_phase<T: Toolchain>(
    toolchain: &T,
    mut outcome: TestRunOutcome,
    options: &CycleOptions<'_>,
) -> TestRunOutcome {
    let label = &options.alternate_label;

    if !toolchain.shim_present() {
        if let Err(err) = toolchain.install_shim() {
            warn!(err = %format!("{err:#}"), "alternate-target setup failed");
            outcome.alternate = AlternateStatus::Skipped;
            return outcome.with_message(StatusLine::fail(format!(
                "{label} tests skipped (setup failed)"
            )));
        }
    }

    let mut filter = new_filter(options);
    let result = toolchain.test_alternate(&mut |chunk: &str| filter.add(chunk));
    let report = filter.finish();
    log_filter_report(label, &report);
    if let Ok(out) = &result {
        note_truncation(label, out, options);
    }

    match result {
        Ok(out) if out.success => {
            outcome.alternate = AlternateStatus::Passed;
            outcome = outcome.with_message(StatusLine::pass(format!("tests {label} ok")));
            let coverage = average_coverage(&out.output);
            if outcome.coverage_percent == 0 && coverage > 0 {
                outcome.coverage_percent = coverage;
                outcome = outcome.with_message(StatusLine::pass(format!("coverage: {coverage}%")));
            }
            outcome
        }
        Ok(out) => {
            outcome.alternate = AlternateStatus::Failed;
            outcome.test = TestStatus::Failed;
            let text = if out.timed_out {
                format!("tests {label} timed out")
            } else {
                format!("tests {label} failed")
            };
            outcome.with_message(StatusLine::fail(text))
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "alternate-target tests could not run");
            outcome.alternate = AlternateStatus::Failed;
            outcome.test = TestStatus::Failed;
            outcome.with_message(StatusLine::fail(format!("tests {label} failed")))
        }
    }
}

/// Verdicts come from the bounded capture, so say when it was cut short.
fn note_truncation(label: &str, out: &CommandOutput, options: &CycleOptions<'_>) {
    let Some(notice) = out.truncated_notice(label) else {
        return;
    };
    warn!(truncated = out.truncated, "{label} output exceeded the capture limit");
    if let Some(sink) = options.on_line {
        sink(&notice);
    }
}

fn log_filter_report(phase: &str, report: &FilterReport) {
    debug!(
        phase,
        packages_ok = report.packages_ok,
        packages_failed = report.packages_failed,
        test_failures = report.test_failures,
        panics = report.panics,
        races = report.races,
        retained = report.retained.len(),
        suppressed = report.suppressed,
        "output filtered"
    );
}
