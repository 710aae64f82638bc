//! Status badges in a Markdown document.
//!
//! The badge block lives between two HTML comment markers so it can be
//! regenerated in place. Updating it is a best-effort side effect of a test
//! run: callers record the outcome but never fail because of it.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::{RaceStatus, TestStatus, VetStatus};

pub const BADGES_START: &str = "<!-- START_SECTION:BADGES_SECTION -->";
pub const BADGES_END: &str = "<!-- END_SECTION:BADGES_SECTION -->";

/// Aggregate fields rendered as badges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeReport {
    pub license: String,
    pub toolchain_version: Option<String>,
    pub test: TestStatus,
    pub coverage_percent: u8,
    pub race: RaceStatus,
    pub vet: VetStatus,
}

/// Outcome of a best-effort side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Applied,
    /// Disabled, or there was nothing to act on.
    Skipped,
    Failed(String),
}

impl SideEffect {
    /// Fold a fallible action into a non-fatal outcome.
    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Applied,
            Err(err) => Self::Failed(format!("{err:#}")),
        }
    }
}

/// Writes a [`BadgeReport`] somewhere visible.
pub trait BadgeUpdater: Sync {
    /// `Ok(SideEffect::Skipped)` when there is no target to write to.
    fn update(&self, report: &BadgeReport) -> Result<SideEffect>;
}

/// Badge block in a Markdown file, rendered as shields.io images.
#[derive(Debug, Clone)]
pub struct MarkdownBadges {
    document: PathBuf,
}

impl MarkdownBadges {
    pub fn new(document: impl Into<PathBuf>) -> Self {
        Self {
            document: document.into(),
        }
    }
}

impl BadgeUpdater for MarkdownBadges {
    #[instrument(skip_all, fields(document = %self.document.display()))]
    fn update(&self, report: &BadgeReport) -> Result<SideEffect> {
        if !self.document.exists() {
            debug!("no badge document, skipping");
            return Ok(SideEffect::Skipped);
        }
        let contents = fs::read_to_string(&self.document)
            .with_context(|| format!("read {}", self.document.display()))?;
        let updated = replace_badge_block(&contents, &render_badges(report));
        if updated == contents {
            debug!("badges unchanged");
            return Ok(SideEffect::Applied);
        }
        fs::write(&self.document, updated)
            .with_context(|| format!("write {}", self.document.display()))?;
        debug!("badges updated");
        Ok(SideEffect::Applied)
    }
}

/// Render the badge block, markers included.
pub fn render_badges(report: &BadgeReport) -> String {
    let test_color = match report.test {
        TestStatus::Passing => "brightgreen",
        TestStatus::Failed => "red",
    };
    let race_color = match report.race {
        RaceStatus::Clean => "green",
        RaceStatus::Detected => "red",
    };
    let vet_color = match report.vet {
        VetStatus::Ok => "green",
        VetStatus::Issues => "red",
    };
    let coverage_color = match report.coverage_percent {
        80.. => "brightgreen",
        60..=79 => "yellow",
        40..=59 => "orange",
        _ => "red",
    };
    let version = report.toolchain_version.as_deref().unwrap_or("unknown");

    let badges = [
        badge("License", &report.license, "blue"),
        badge("Go", version, "blue"),
        badge("Tests", &report.test.to_string(), test_color),
        badge(
            "Coverage",
            &format!("{}%", report.coverage_percent),
            coverage_color,
        ),
        badge("Race", &report.race.to_string(), race_color),
        badge("Vet", &report.vet.to_string(), vet_color),
    ];

    let mut out = String::new();
    out.push_str(BADGES_START);
    out.push('\n');
    for line in badges {
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(BADGES_END);
    out
}

fn badge(label: &str, message: &str, color: &str) -> String {
    format!(
        "<img src=\"https://img.shields.io/badge/{}-{}-{}\" alt=\"{label}\">",
        escape_segment(label),
        escape_segment(message),
        color
    )
}

/// shields.io static badge path segment escaping.
fn escape_segment(text: &str) -> String {
    text.replace('-', "--")
        .replace('_', "__")
        .replace('%', "%25")
        .replace(' ', "_")
}

/// Replace the marked badge block, or insert one after the first `# ` heading.
///
/// The document keeps its line endings: a document using `\r\n` gets the
/// block with `\r\n` too.
pub fn replace_badge_block(contents: &str, block: &str) -> String {
    let eol = if contents.contains("\r\n") { "\r\n" } else { "\n" };
    let block = block.lines().collect::<Vec<_>>().join(eol);

    if let Some(start) = contents.find(BADGES_START)
        && let Some(end_rel) = contents[start..].find(BADGES_END)
    {
        let end = start + end_rel + BADGES_END.len();
        return format!("{}{}{}", &contents[..start], block, &contents[end..]);
    }

    let mut lines: Vec<&str> = contents.lines().collect();
    let insert_at = lines
        .iter()
        .position(|line| line.starts_with("# "))
        .map_or(0, |idx| idx + 1);
    lines.insert(insert_at, &block);
    let mut out = lines.join(eol);
    out.push_str(eol);
    out
}
