use crate::config::PipelineConfig;
use crate::types::{Document, Paragraph, TemplateRules};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use super::header_footer::HeaderFooterRule;
use super::indentation::IndentationRule;
use super::margins::MarginsRule;
use super::marks::MarksNotationRule;
use super::numbering::NumberingRule;
use super::spacing::ColonSpacingRule;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    #[error("unknown rule in pipeline: {0}")]
    UnknownRule(String),

    #[error("invalid template value for {field}: {value}")]
    InvalidTemplate { field: &'static str, value: f32 },
}

/// Whether a rule rewrites the document as a whole or one body paragraph at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    Document,
    Paragraph,
}

/// A single deterministic formatting transform.
///
/// Every rule must be idempotent: applying it to its own output changes
/// nothing. Paragraph-level rules only ever see paragraphs without math;
/// the engine checks that once per paragraph before handing it over.
///
/// Text rewrites go through [`Paragraph::set_text`], which keeps the first
/// run's formatting and drops the rest. Mixed formatting inside a rewritten
/// paragraph is therefore lost.
pub trait FormatRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn scope(&self) -> RuleScope;

    /// Returns the number of changes made
    fn apply_to_document(&self, _document: &mut Document, _template: &TemplateRules) -> usize {
        0
    }

    /// Returns true if the paragraph was changed
    fn apply_to_paragraph(&self, _paragraph: &mut Paragraph, _template: &TemplateRules) -> bool {
        false
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub changes: usize,
    pub elapsed_us: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FormattingReport {
    pub rules: Vec<RuleOutcome>,
    /// Body paragraphs left untouched because they contain math
    pub math_paragraphs_skipped: usize,
}

impl FormattingReport {
    pub fn total_changes(&self) -> usize {
        self.rules.iter().map(|outcome| outcome.changes).sum()
    }

    pub fn changes_for(&self, rule: &str) -> usize {
        self.rules
            .iter()
            .filter(|outcome| outcome.rule == rule)
            .map(|outcome| outcome.changes)
            .sum()
    }
}

/// Consecutive paragraph rules are batched so each paragraph is visited,
/// and math-checked, once per batch.
enum PipelineStep {
    Document(Box<dyn FormatRule>),
    Paragraphs(Vec<Box<dyn FormatRule>>),
}

pub struct RuleEngine {
    steps: Vec<PipelineStep>,
}

impl RuleEngine {
    /// Build the engine from a pipeline config, skipping disabled rules
    pub fn from_config(pipeline: &PipelineConfig) -> Result<Self, FormatError> {
        let mut steps: Vec<PipelineStep> = Vec::new();

        for rule_config in &pipeline.rules {
            if !rule_config.enabled {
                debug!(rule = %rule_config.name, "skipping disabled rule");
                continue;
            }
            let rule = rule_by_name(&rule_config.name)?;
            match rule.scope() {
                RuleScope::Document => steps.push(PipelineStep::Document(rule)),
                RuleScope::Paragraph => match steps.last_mut() {
                    Some(PipelineStep::Paragraphs(batch)) => batch.push(rule),
                    _ => steps.push(PipelineStep::Paragraphs(vec![rule])),
                },
            }
        }

        Ok(Self { steps })
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .flat_map(|step| match step {
                PipelineStep::Document(rule) => vec![rule.name()],
                PipelineStep::Paragraphs(batch) => batch.iter().map(|rule| rule.name()).collect(),
            })
            .collect()
    }

    /// Apply every enabled rule to `document` in place.
    ///
    /// The template is validated first, so a rejected template leaves the
    /// document untouched.
    pub fn apply(
        &self,
        document: &mut Document,
        template: &TemplateRules,
    ) -> Result<FormattingReport, FormatError> {
        validate_template(template)?;

        let mut report = FormattingReport::default();

        for step in &self.steps {
            match step {
                PipelineStep::Document(rule) => {
                    let rule_start = Instant::now();
                    let changes = rule.apply_to_document(document, template);
                    report.rules.push(RuleOutcome {
                        rule: rule.name().to_string(),
                        changes,
                        elapsed_us: rule_start.elapsed().as_micros() as u64,
                    });
                    debug!(rule = rule.name(), changes, "applied document rule");
                }
                PipelineStep::Paragraphs(batch) => {
                    let mut changes = vec![0usize; batch.len()];
                    let mut elapsed = vec![0u64; batch.len()];
                    let mut skipped = 0;

                    for paragraph in document.paragraphs_mut() {
                        if paragraph.contains_math() {
                            skipped += 1;
                            continue;
                        }
                        for (index, rule) in batch.iter().enumerate() {
                            let rule_start = Instant::now();
                            if rule.apply_to_paragraph(paragraph, template) {
                                changes[index] += 1;
                            }
                            elapsed[index] += rule_start.elapsed().as_micros() as u64;
                        }
                    }

                    report.math_paragraphs_skipped = report.math_paragraphs_skipped.max(skipped);
                    for (index, rule) in batch.iter().enumerate() {
                        debug!(rule = rule.name(), changes = changes[index], "applied paragraph rule");
                        report.rules.push(RuleOutcome {
                            rule: rule.name().to_string(),
                            changes: changes[index],
                            elapsed_us: elapsed[index],
                        });
                    }
                }
            }
        }

        info!(
            total_changes = report.total_changes(),
            math_paragraphs_skipped = report.math_paragraphs_skipped,
            "formatting rules applied"
        );
        Ok(report)
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self {
            steps: vec![
                PipelineStep::Document(Box::new(HeaderFooterRule)),
                PipelineStep::Document(Box::new(MarginsRule)),
                PipelineStep::Paragraphs(vec![
                    Box::new(NumberingRule),
                    Box::new(MarksNotationRule),
                    Box::new(ColonSpacingRule),
                    Box::new(IndentationRule),
                ]),
            ],
        }
    }
}

fn rule_by_name(name: &str) -> Result<Box<dyn FormatRule>, FormatError> {
    let rule: Box<dyn FormatRule> = match name {
        "HeaderFooter" => Box::new(HeaderFooterRule),
        "Margins" => Box::new(MarginsRule),
        "Numbering" => Box::new(NumberingRule),
        "MarksNotation" => Box::new(MarksNotationRule),
        "ColonSpacing" => Box::new(ColonSpacingRule),
        "Indentation" => Box::new(IndentationRule),
        _ => return Err(FormatError::UnknownRule(name.to_string())),
    };
    Ok(rule)
}

fn validate_template(template: &TemplateRules) -> Result<(), FormatError> {
    let margins = &template.margin_cm;
    let indents = &template.indentation_cm;
    let lengths = [
        ("margin_cm.top", margins.top),
        ("margin_cm.bottom", margins.bottom),
        ("margin_cm.left", margins.left),
        ("margin_cm.right", margins.right),
        ("indentation_cm.l1", Some(indents.l1)),
        ("indentation_cm.l2", Some(indents.l2)),
        ("indentation_cm.l3", Some(indents.l3)),
    ];

    for (field, value) in lengths {
        if let Some(value) = value {
            if !value.is_finite() || value < 0.0 {
                return Err(FormatError::InvalidTemplate { field, value });
            }
        }
    }
    Ok(())
}
