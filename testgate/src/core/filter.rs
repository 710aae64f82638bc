//! Incremental classifier for streamed test output.
//!
//! A [`StreamFilter`] is fed arbitrary chunks of process output as they arrive,
//! reassembles lines across chunk boundaries, and keeps only the lines a human
//! needs to act on: failures, panics, race reports and compiler diagnostics.
//! Routine progress (`ok` package lines, `=== RUN`, `--- PASS`) is dropped.
//!
//! Verbose per-test output is held back, keyed by test name, until that
//! test's verdict is known: it is kept if the test fails and discarded if it
//! passes. Subtest verdicts are printed after their parent's, so a failing
//! parent never promotes the output of a passing subtest.
//!
//! One filter per stream. Filters share nothing, so concurrent processes can
//! each own one.

use tracing::debug;

use crate::core::patterns::{Effect, classify};

/// Counters and retained lines accumulated by a filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    /// Lines that survived filtering, in arrival order.
    pub retained: Vec<String>,
    pub packages_ok: usize,
    pub packages_failed: usize,
    pub test_failures: usize,
    pub panics: usize,
    pub races: usize,
    pub suppressed: usize,
}

impl FilterReport {
    /// No failure of any kind was observed.
    pub fn is_clean(&self) -> bool {
        self.packages_failed == 0 && self.test_failures == 0 && self.panics == 0 && self.races == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    None,
    /// After `--- FAIL:`: indented detail lines belong to the failure.
    Failure,
    /// After `panic:`: everything up to the package summary is the trace.
    Panic,
    /// Inside a race detector report.
    Race,
}

type LineCallback<'a> = Box<dyn FnMut(&str) + 'a>;

/// Indented output of one running test, awaiting its verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Held {
    test: String,
    lines: Vec<String>,
}

pub struct StreamFilter<'a> {
    buffer: String,
    quiet: bool,
    in_test: bool,
    /// Test that owns indented output arriving now.
    current: Option<String>,
    block: Block,
    pending: Vec<Held>,
    report: FilterReport,
    on_line: Option<LineCallback<'a>>,
    flushed: bool,
}

impl std::fmt::Debug for StreamFilter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFilter")
            .field("quiet", &self.quiet)
            .field("block", &self.block)
            .field("current", &self.current)
            .field("pending", &self.pending.len())
            .field("report", &self.report)
            .field("flushed", &self.flushed)
            .finish_non_exhaustive()
    }
}

impl<'a> StreamFilter<'a> {
    /// Create a filter. In `quiet` mode unrecognized lines are dropped too.
    pub fn new(quiet: bool) -> Self {
        Self {
            buffer: String::new(),
            quiet,
            in_test: false,
            current: None,
            block: Block::None,
            pending: Vec::new(),
            report: FilterReport::default(),
            on_line: None,
            flushed: false,
        }
    }

    /// Invoke `callback` once for every retained line, as it is retained.
    pub fn with_callback(mut self, callback: impl FnMut(&str) + 'a) -> Self {
        self.on_line = Some(Box::new(callback));
        self
    }

    /// Feed a chunk of output. Chunks may end mid-line.
    pub fn add(&mut self, chunk: &str) {
        if self.flushed {
            debug!(bytes = chunk.len(), "ignoring output after flush");
            return;
        }
        self.buffer.push_str(chunk);
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.process(line.trim_end_matches(['\n', '\r']));
        }
    }

    /// Classify any trailing partial line and settle held-back output.
    pub fn flush(&mut self) {
        if self.flushed {
            return;
        }
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.process(rest.trim_end_matches('\r'));
        }
        self.drop_pending();
        self.flushed = true;
    }

    pub fn report(&self) -> &FilterReport {
        &self.report
    }

    /// Flush and hand back the report.
    pub fn finish(mut self) -> FilterReport {
        self.flush();
        self.report
    }

    fn process(&mut self, line: &str) {
        let effect = classify(line);

        match self.block {
            Block::Race => {
                self.retain(line);
                if effect == Some(Effect::RaceBlockEnd) {
                    self.block = Block::None;
                }
                return;
            }
            Block::Panic
                if !matches!(
                    effect,
                    Some(Effect::PackageFailed | Effect::PackagePassed | Effect::Trailer)
                ) =>
            {
                self.retain(line);
                return;
            }
            _ => {}
        }

        match effect {
            Some(Effect::RaceDetected) => {
                self.report.races += 1;
                self.promote_current();
                self.retain(line);
                self.block = Block::Race;
            }
            Some(Effect::TestFailed) => {
                self.report.test_failures += 1;
                if let Some(test) = test_name(line) {
                    self.promote_test(test);
                }
                self.retain(line);
                self.block = Block::Failure;
            }
            Some(Effect::Panic) => {
                self.report.panics += 1;
                self.promote_current();
                self.retain(line);
                self.block = Block::Panic;
            }
            Some(Effect::PackageFailed) => {
                self.report.packages_failed += 1;
                self.promote_pending();
                self.retain(line);
                self.end_package();
            }
            Some(Effect::PackagePassed) => {
                self.report.packages_ok += 1;
                self.drop_pending();
                self.suppress();
                self.end_package();
            }
            Some(Effect::Diagnostic | Effect::BuildFailed) => {
                self.retain(line);
            }
            Some(Effect::TestStarted) => {
                self.in_test = true;
                self.block = Block::None;
                if !line.starts_with("=== PAUSE")
                    && let Some(test) = test_name(line)
                {
                    self.current = Some(test.to_string());
                }
                self.suppress();
            }
            Some(Effect::TestPassed) => {
                if let Some(test) = test_name(line) {
                    self.drop_test(test);
                }
                self.block = Block::None;
                self.suppress();
            }
            Some(
                Effect::NoTestFiles
                | Effect::CoverageLine
                | Effect::Trailer
                | Effect::VetNoise
                | Effect::RaceBlockEnd,
            ) => {
                if effect == Some(Effect::Trailer) {
                    self.block = Block::None;
                }
                self.suppress();
            }
            Some(Effect::NoPackages) | None => self.process_plain(line),
        }
    }

    fn process_plain(&mut self, line: &str) {
        if line.trim().is_empty() {
            self.suppress();
            return;
        }
        let indented = line.starts_with([' ', '\t']);
        if indented && self.block == Block::Failure {
            self.retain(line);
            return;
        }
        if !indented {
            self.block = Block::None;
        }
        if indented && self.in_test {
            self.hold(line);
            return;
        }
        if self.quiet {
            self.suppress();
        } else {
            self.retain(line);
        }
    }

    fn end_package(&mut self) {
        self.block = Block::None;
        self.in_test = false;
        self.current = None;
    }

    fn hold(&mut self, line: &str) {
        let test = self.current.as_deref().unwrap_or_default();
        match self.pending.iter().position(|held| held.test == test) {
            Some(idx) => self.pending[idx].lines.push(line.to_string()),
            None => self.pending.push(Held {
                test: test.to_string(),
                lines: vec![line.to_string()],
            }),
        }
    }

    fn take_test(&mut self, test: &str) -> Option<Held> {
        let idx = self.pending.iter().position(|held| held.test == test)?;
        Some(self.pending.remove(idx))
    }

    fn promote_test(&mut self, test: &str) {
        if let Some(held) = self.take_test(test) {
            for line in held.lines {
                self.retain(&line);
            }
        }
    }

    fn promote_current(&mut self) {
        let test = self.current.clone().unwrap_or_default();
        self.promote_test(&test);
    }

    fn drop_test(&mut self, test: &str) {
        if let Some(held) = self.take_test(test) {
            self.report.suppressed += held.lines.len();
        }
    }

    /// A failed package promotes output of tests that never reported a verdict.
    fn promote_pending(&mut self) {
        for held in std::mem::take(&mut self.pending) {
            for line in held.lines {
                self.retain(&line);
            }
        }
    }

    fn drop_pending(&mut self) {
        for held in std::mem::take(&mut self.pending) {
            self.report.suppressed += held.lines.len();
        }
    }

    fn retain(&mut self, line: &str) {
        if let Some(callback) = self.on_line.as_mut() {
            callback(line);
        }
        self.report.retained.push(line.to_string());
    }

    fn suppress(&mut self) {
        self.report.suppressed += 1;
    }
}

/// Test name from `=== RUN   TestA/sub` or `--- FAIL: TestA/sub (0.00s)`.
fn test_name(line: &str) -> Option<&str> {
    line.split_whitespace().nth(2)
}
