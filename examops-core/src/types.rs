use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type JobId = String;

// ===== DOCUMENT MODEL =====
// A Document is the in-memory form of a WordprocessingML package body.
// Paragraph order is significant and never changes during formatting.
// Non-paragraph body content (tables, content controls) is carried verbatim.

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub body: Vec<Block>,
    pub sections: Vec<Section>,
    /// Attributes of the source `w:document` root (namespace declarations)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub root_attributes: Vec<(String, String)>,
    /// Everything else the source package held, written back unchanged
    #[serde(skip)]
    pub package: Option<SourcePackage>,
}

/// Package content outside the modelled document: styles, numbering,
/// settings, theme, media, document properties and the relationships that
/// point at them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourcePackage {
    /// Part name (no leading slash) to raw bytes
    pub parts: BTreeMap<String, Vec<u8>>,
    /// `word/document.xml` relationships other than the rewritten header/footer ones
    pub relationships: Vec<Relationship>,
    /// `Default` entries of `[Content_Types].xml`: (extension, content type)
    pub content_type_defaults: Vec<(String, String)>,
    /// `Override` entries of `[Content_Types].xml`, keyed by part name
    pub content_type_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    /// Target as written, relative to `word/` unless absolute or external
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode.as_deref() == Some("External")
    }

    /// Part name inside the package, `None` for external targets
    pub fn part_name(&self) -> Option<String> {
        if self.is_external() {
            return None;
        }
        Some(match self.target.strip_prefix('/') {
            Some(absolute) => absolute.to_string(),
            None => format!("word/{}", self.target),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Paragraph(Paragraph),
    /// Raw XML of a body-level element we do not model (e.g. `w:tbl`)
    Opaque(String),
}

impl Document {
    /// Build a single-section document with one plain run per paragraph
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            body: texts
                .into_iter()
                .map(|text| Block::Paragraph(Paragraph::from_text(text)))
                .collect(),
            sections: vec![Section::default()],
            root_attributes: Vec::new(),
            package: None,
        }
    }

    pub fn paragraphs(&self) -> impl Iterator<Item = &Paragraph> {
        self.body.iter().filter_map(|block| match block {
            Block::Paragraph(paragraph) => Some(paragraph),
            Block::Opaque(_) => None,
        })
    }

    pub fn paragraphs_mut(&mut self) -> impl Iterator<Item = &mut Paragraph> {
        self.body.iter_mut().filter_map(|block| match block {
            Block::Paragraph(paragraph) => Some(paragraph),
            Block::Opaque(_) => None,
        })
    }

    pub fn push_paragraph(&mut self, paragraph: Paragraph) {
        self.body.push(Block::Paragraph(paragraph));
    }

    /// One line per body paragraph; blank paragraphs stay as blank lines
    pub fn text_lines(&self) -> Vec<String> {
        self.paragraphs().map(Paragraph::text).collect()
    }

    pub fn plain_text(&self) -> String {
        self.text_lines().join("\n")
    }

    /// First-section header text, paragraphs joined by a single space
    pub fn header_text(&self) -> String {
        self.sections
            .first()
            .map(|section| join_paragraph_texts(&section.header))
            .unwrap_or_default()
    }

    pub fn footer_text(&self) -> String {
        self.sections
            .first()
            .map(|section| join_paragraph_texts(&section.footer))
            .unwrap_or_default()
    }
}

fn join_paragraph_texts(paragraphs: &[Paragraph]) -> String {
    paragraphs
        .iter()
        .map(Paragraph::text)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Paragraph {
    pub runs: Vec<Run>,
    /// Left indent in centimetres; `None` means inherited from the style
    pub left_indent_cm: Option<f32>,
    /// Other `w:ind` attributes (hanging, firstLine, ...) as written in the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indent_attributes: Option<String>,
    /// Verbatim `w:pPr` children other than indentation and section properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
    /// This paragraph closes the section at the same index in `Document::sections`
    #[serde(default)]
    pub section_break: bool,
}

impl Paragraph {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            runs: vec![Run::plain(text)],
            ..Self::default()
        }
    }

    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }

    pub fn contains_math(&self) -> bool {
        self.runs.iter().any(Run::is_math)
    }

    pub fn is_blank(&self) -> bool {
        self.runs.iter().all(|run| run.text.trim().is_empty())
    }

    /// Replace the visible text, keeping the first text run's formatting.
    ///
    /// Later text runs are dropped, so per-run formatting beyond the first
    /// text run is lost. Embedded runs (drawings, fields, bookmarks) stay
    /// where they were. Callers must not use this on math paragraphs.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let mut text = Some(text.into());
        self.runs.retain_mut(|run| {
            if run.is_embedded() {
                return true;
            }
            match text.take() {
                Some(text) => {
                    run.text = text;
                    run.math = None;
                    true
                }
                None => false,
            }
        });
        if let Some(text) = text {
            self.runs.insert(0, Run::plain(text));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    /// Verbatim `w:rPr` element, if the run had formatting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<String>,
    /// Verbatim `m:oMath`/`m:oMathPara` XML when this run is a math expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math: Option<String>,
    /// Content carried verbatim instead of text; such runs have no visible text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded: Option<Embedded>,
}

/// Raw XML the formatter never interprets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Embedded {
    /// A `w:r` child other than text, tabs and line breaks: drawings,
    /// field characters and codes, symbols, note references, page breaks
    InRun(String),
    /// A paragraph child other than runs and math: bookmarks, simple
    /// fields, comment ranges, tracked deletions
    InParagraph(String),
}

impl Run {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn math(xml: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            math: Some(xml.into()),
            ..Self::default()
        }
    }

    pub fn embedded(content: Embedded, properties: Option<String>) -> Self {
        Self {
            properties,
            embedded: Some(content),
            ..Self::default()
        }
    }

    pub fn is_math(&self) -> bool {
        self.math.is_some()
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Section {
    pub header: Vec<Paragraph>,
    pub footer: Vec<Paragraph>,
    /// Non-paragraph content of the header part (tables, content controls),
    /// each tagged with the number of header paragraphs before it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header_blocks: Vec<(usize, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub footer_blocks: Vec<(usize, String)>,
    /// Part the header was read from; its own relationships stay attached to it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_part: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer_part: Option<String>,
    pub margins: Margins,
    /// Other `w:pgMar` attributes (header/footer distance, gutter)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_attributes: Option<String>,
    /// Verbatim `w:sectPr` children other than margins and header/footer references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
}

/// Page margins in centimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl Margins {
    /// Institutional default used when a template leaves a side unset
    pub const INSTITUTIONAL: Margins = Margins {
        top: 2.5,
        bottom: 2.5,
        left: 3.0,
        right: 2.5,
    };
}

impl Default for Margins {
    // Word's own default page setup (1 inch on every side)
    fn default() -> Self {
        Self {
            top: 2.54,
            bottom: 2.54,
            left: 2.54,
            right: 2.54,
        }
    }
}

// ===== TEMPLATE RULES =====
// One record per institution/template. Read-only during a formatting run.

pub const DEFAULT_HEADER_TEXT: &str = "SOUTHERN UNIVERSITY COLLEGE";
pub const FOOTER_PLACEHOLDER: &str = "Page";

fn default_header_text() -> String {
    DEFAULT_HEADER_TEXT.to_string()
}

fn default_numbering_scheme() -> Vec<String> {
    vec!["Q{n}.".to_string(), "(a)".to_string(), "(i)".to_string()]
}

fn default_marks_pattern() -> String {
    r"(\d+ marks?)".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRules {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_header_text")]
    pub header_text: String,
    #[serde(default)]
    pub footer_text: String,
    /// Level formats, outermost first
    #[serde(default = "default_numbering_scheme")]
    pub numbering_scheme: Vec<String>,
    #[serde(default = "default_marks_pattern")]
    pub marks_pattern: String,
    #[serde(default = "default_true")]
    pub colon_spacing: bool,
    #[serde(default)]
    pub margin_cm: MarginRules,
    #[serde(default)]
    pub indentation_cm: IndentationRules,
}

impl Default for TemplateRules {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            header_text: default_header_text(),
            footer_text: String::new(),
            numbering_scheme: default_numbering_scheme(),
            marks_pattern: default_marks_pattern(),
            colon_spacing: true,
            margin_cm: MarginRules::default(),
            indentation_cm: IndentationRules::default(),
        }
    }
}

impl TemplateRules {
    /// Footer text to inject, falling back to the page placeholder token
    pub fn effective_footer_text(&self) -> &str {
        if self.footer_text.trim().is_empty() {
            FOOTER_PLACEHOLDER
        } else {
            &self.footer_text
        }
    }
}

/// Per-side margin overrides; unset sides use `Margins::INSTITUTIONAL`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarginRules {
    #[serde(default)]
    pub top: Option<f32>,
    #[serde(default)]
    pub bottom: Option<f32>,
    #[serde(default)]
    pub left: Option<f32>,
    #[serde(default)]
    pub right: Option<f32>,
}

impl MarginRules {
    pub fn resolve(&self) -> Margins {
        let fallback = Margins::INSTITUTIONAL;
        Margins {
            top: self.top.unwrap_or(fallback.top),
            bottom: self.bottom.unwrap_or(fallback.bottom),
            left: self.left.unwrap_or(fallback.left),
            right: self.right.unwrap_or(fallback.right),
        }
    }
}

impl From<Margins> for MarginRules {
    fn from(margins: Margins) -> Self {
        Self {
            top: Some(margins.top),
            bottom: Some(margins.bottom),
            left: Some(margins.left),
            right: Some(margins.right),
        }
    }
}

/// Left indent per numbering level, in centimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndentationRules {
    pub l1: f32,
    pub l2: f32,
    pub l3: f32,
}

impl Default for IndentationRules {
    fn default() -> Self {
        Self {
            l1: 0.0,
            l2: 1.5,
            l3: 3.0,
        }
    }
}

impl IndentationRules {
    pub fn for_level(&self, level: NumberingLevel) -> f32 {
        match level {
            NumberingLevel::Question => self.l1,
            NumberingLevel::Part => self.l2,
            NumberingLevel::Subpart => self.l3,
        }
    }
}

/// Question hierarchy recognised from a paragraph's leading marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberingLevel {
    /// `Q1.`
    Question,
    /// `(a)`
    Part,
    /// `(i)` or `(1)`
    Subpart,
}

// ===== VALIDATION (ADVISORY SCORER OUTPUT) =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub compliance_score: Option<f64>,
    pub category_scores: BTreeMap<String, f64>,
    pub issues_found: Vec<String>,
    pub edge_cases: Vec<String>,
    pub math_preserved: bool,
    pub summary: String,
    /// True exactly when `compliance_score` is `None`
    pub fallback_mode: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn scored(
        compliance_score: f64,
        category_scores: BTreeMap<String, f64>,
        issues_found: Vec<String>,
        edge_cases: Vec<String>,
        math_preserved: bool,
        summary: String,
    ) -> Self {
        Self {
            compliance_score: Some(compliance_score),
            category_scores,
            issues_found,
            edge_cases,
            math_preserved,
            summary,
            fallback_mode: false,
            error: None,
        }
    }

    pub fn fallback(error: impl Into<String>) -> Self {
        Self {
            compliance_score: None,
            category_scores: BTreeMap::new(),
            issues_found: Vec::new(),
            edge_cases: Vec::new(),
            math_preserved: true,
            summary: "Compliance validation unavailable.".to_string(),
            fallback_mode: true,
            error: Some(error.into()),
        }
    }
}

// ===== DIFF SUMMARY =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FixCounts {
    pub numbering: usize,
    pub spacing: usize,
    pub marks: usize,
    pub indentation: usize,
}

impl FixCounts {
    pub fn sum(&self) -> usize {
        self.numbering + self.spacing + self.marks + self.indentation
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub html_report: String,
    pub fix_counts: FixCounts,
    pub header_footer_changed: bool,
    /// Fix counts plus one if the header/footer changed. A proxy for the
    /// number of fix categories touched, not a literal edit count.
    pub total_changes: usize,
    pub compliance_score: Option<f64>,
}

impl DiffSummary {
    pub fn new(
        html_report: String,
        fix_counts: FixCounts,
        header_footer_changed: bool,
        compliance_score: Option<f64>,
    ) -> Self {
        Self {
            html_report,
            fix_counts,
            header_footer_changed,
            total_changes: fix_counts.sum() + usize::from(header_footer_changed),
            compliance_score,
        }
    }

    /// Substituted when report generation fails
    pub fn empty() -> Self {
        Self::default()
    }
}

// ===== JOBS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Pending,
    Downloading,
    RetrievingTemplate,
    Formatting,
    GeneratingDiff,
    Saving,
    Success,
    Partial,
    Failed,
}

impl JobStage {
    /// The working stage that follows this one; `None` once saving is reached
    pub fn next(self) -> Option<JobStage> {
        match self {
            JobStage::Pending => Some(JobStage::Downloading),
            JobStage::Downloading => Some(JobStage::RetrievingTemplate),
            JobStage::RetrievingTemplate => Some(JobStage::Formatting),
            JobStage::Formatting => Some(JobStage::GeneratingDiff),
            JobStage::GeneratingDiff => Some(JobStage::Saving),
            JobStage::Saving | JobStage::Success | JobStage::Partial | JobStage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Success | JobStage::Partial | JobStage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStage::Pending => "pending",
            JobStage::Downloading => "downloading",
            JobStage::RetrievingTemplate => "retrieving_template",
            JobStage::Formatting => "formatting",
            JobStage::GeneratingDiff => "generating_diff",
            JobStage::Saving => "saving",
            JobStage::Success => "success",
            JobStage::Partial => "partial",
            JobStage::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Partial,
    Failed,
}

/// Stable error vocabulary exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "ERR_CORRUPTED_FILE")]
    CorruptedFile,
    #[serde(rename = "ERR_TEMPLATE_NOT_FOUND")]
    TemplateNotFound,
    #[serde(rename = "ERR_STORAGE")]
    Storage,
    #[serde(rename = "ERR_FORMATTING")]
    Formatting,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::CorruptedFile => "ERR_CORRUPTED_FILE",
            ErrorCode::TemplateNotFound => "ERR_TEMPLATE_NOT_FOUND",
            ErrorCode::Storage => "ERR_STORAGE",
            ErrorCode::Formatting => "ERR_FORMATTING",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the formatted document and the diff report were persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLocations {
    pub document: String,
    pub report: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: JobStage,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub compliance_score: Option<f64>,
    pub formatted_location: Option<String>,
    pub diff_location: Option<String>,
    pub share_link: Option<String>,
    pub summary: String,
    /// `"{TOKEN}: {detail}"` for fatal failures
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub stage_timings: Vec<StageTiming>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }
}
