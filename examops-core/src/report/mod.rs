// Diff & Summary Builder: HTML change report plus per-category fix counts.

pub mod diff;
pub mod html;

use crate::config::ReportConfig;
use crate::types::{DiffSummary, Document, FixCounts, ValidationResult};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::info;

static NUMBERING_ISSUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)number(ing)?").unwrap());
static SPACING_ISSUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)spacing|colon").unwrap());
static MARKS_ISSUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)mark").unwrap());
static INDENT_ISSUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)indent").unwrap());

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("document too large to diff: {original_lines} x {formatted_lines} lines exceeds {ceiling} cells")]
    TooLarge {
        original_lines: usize,
        formatted_lines: usize,
        ceiling: usize,
    },
}

/// Count fix categories named in the scorer's issues. An issue matching
/// several categories counts once in each; unmatched issues are ignored.
pub fn classify_issues(issues: &[String]) -> FixCounts {
    let count = |pattern: &Regex| issues.iter().filter(|issue| pattern.is_match(issue)).count();
    FixCounts {
        numbering: count(&NUMBERING_ISSUE),
        spacing: count(&SPACING_ISSUE),
        marks: count(&MARKS_ISSUE),
        indentation: count(&INDENT_ISSUE),
    }
}

#[derive(Debug, Clone)]
pub struct DiffBuilder {
    context_lines: usize,
    max_diff_cells: usize,
}

impl Default for DiffBuilder {
    fn default() -> Self {
        Self::new(&ReportConfig::default())
    }
}

impl DiffBuilder {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            context_lines: config.context_lines,
            max_diff_cells: config.max_diff_cells,
        }
    }

    pub fn summarize(
        &self,
        original: &Document,
        transformed: &Document,
        validation: &ValidationResult,
    ) -> Result<DiffSummary, ReportError> {
        let original_lines = original.text_lines();
        let formatted_lines = transformed.text_lines();

        let cells = original_lines.len().saturating_mul(formatted_lines.len());
        if cells > self.max_diff_cells {
            return Err(ReportError::TooLarge {
                original_lines: original_lines.len(),
                formatted_lines: formatted_lines.len(),
                ceiling: self.max_diff_cells,
            });
        }

        let hunks = diff::grouped_opcodes(
            diff::opcodes(&original_lines, &formatted_lines),
            self.context_lines,
        );

        let fix_counts = classify_issues(&validation.issues_found);
        let header_footer_changed = original.header_text() != transformed.header_text();

        let html_report = html::render_report(
            &original_lines,
            &formatted_lines,
            &hunks,
            &fix_counts,
            header_footer_changed,
            validation.compliance_score,
        );

        let summary = DiffSummary::new(
            html_report,
            fix_counts,
            header_footer_changed,
            validation.compliance_score,
        );
        info!(
            total_changes = summary.total_changes,
            hunks = hunks.len(),
            "diff report generated"
        );
        Ok(summary)
    }
}
