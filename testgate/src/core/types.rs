//! Status types shared by the orchestrator, the cache gate and the badge updater.
//!
//! These are plain values: every phase returns a new [`TestRunOutcome`] instead
//! of mutating shared state, so concurrent phases never touch the same record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of the static-analysis check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VetStatus {
    #[serde(rename = "OK")]
    Ok,
    Issues,
}

/// Result of the primary test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    Passing,
    Failed,
}

/// Race detector verdict for the primary test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaceStatus {
    Clean,
    Detected,
}

/// Outcome of the alternate-target phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternateStatus {
    /// Neither discovery nor the primary run asked for it.
    NotRequired,
    Passed,
    Failed,
    /// The execution shim was missing and could not be installed.
    Skipped,
}

impl fmt::Display for VetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Issues => "Issues",
        })
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passing => "Passing",
            Self::Failed => "Failed",
        })
    }
}

impl fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clean => "Clean",
            Self::Detected => "Detected",
        })
    }
}

/// One labeled entry of the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub ok: bool,
    pub text: String,
}

impl StatusLine {
    pub fn pass(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            text: text.into(),
        }
    }

    pub fn fail(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: text.into(),
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let glyph = if self.ok { "✅" } else { "❌" };
        write!(f, "{glyph} {}", self.text)
    }
}

/// Separator between entries of a rendered summary.
pub const SUMMARY_SEPARATOR: &str = ", ";

/// Aggregate of all phases of one test cycle.
///
/// Starts pessimistic (nothing verified) and is upgraded phase by phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunOutcome {
    pub vet: VetStatus,
    pub test: TestStatus,
    pub race: RaceStatus,
    pub coverage_percent: u8,
    pub alternate: AlternateStatus,
    pub messages: Vec<StatusLine>,
}

impl Default for TestRunOutcome {
    fn default() -> Self {
        Self {
            vet: VetStatus::Issues,
            test: TestStatus::Failed,
            race: RaceStatus::Detected,
            coverage_percent: 0,
            alternate: AlternateStatus::NotRequired,
            messages: Vec::new(),
        }
    }
}

impl TestRunOutcome {
    /// Append a summary line.
    pub fn with_message(mut self, line: StatusLine) -> Self {
        self.messages.push(line);
        self
    }

    /// Render the ordered messages into one line.
    pub fn summary(&self) -> String {
        self.messages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(SUMMARY_SEPARATOR)
    }

    /// Top-level verdict: vet clean, primary tests passing, alternate tests not failed.
    pub fn success(&self) -> bool {
        self.vet == VetStatus::Ok
            && self.test == TestStatus::Passing
            && self.alternate != AlternateStatus::Failed
    }

    /// Whether this outcome may be written to the result cache.
    ///
    /// Stricter than [`Self::success`]: a skipped alternate phase was never
    /// verified, so the next invocation must run it again.
    pub fn cacheable(&self) -> bool {
        self.success() && self.race == RaceStatus::Clean && self.alternate != AlternateStatus::Skipped
    }
}
