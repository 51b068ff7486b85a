// Template extraction: derive TemplateRules from a guideline document

use crate::types::{
    Document, IndentationRules, MarginRules, Margins, TemplateRules, DEFAULT_HEADER_TEXT,
};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static QUESTION_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Q\d+\.").unwrap());
static LETTER_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\([a-z]\)").unwrap());
static ROMAN_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\([ivxlcdm]+\)").unwrap());
static PAREN_MARKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\(\d+\s*marks?\)").unwrap());
static BRACKET_MARKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\[\d+\s*marks?\]").unwrap());
static NON_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

const QUESTION_FORMAT: &str = "Q{n}.";
const LETTER_FORMAT: &str = "(a)";
const ROMAN_FORMAT: &str = "(i)";
const PAREN_MARKS_PATTERN: &str = r"(\d+ marks?)";
const BRACKET_MARKS_PATTERN: &str = r"[\d+ marks?]";

/// Longest paragraph still taken for an institution name
const MAX_HEADER_CHARS: usize = 80;

/// Build template rules from a guideline document.
///
/// Header, footer and margins come from the first section; the numbering
/// scheme and marks notation are detected from body text. Colon spacing is
/// always enforced and indentation uses the standard levels.
pub fn extract_template_rules(document: &Document, title: &str) -> TemplateRules {
    let lines = document.text_lines();

    let margins = document
        .sections
        .first()
        .map(|section| section.margins)
        .unwrap_or(Margins::INSTITUTIONAL);

    let rules = TemplateRules {
        id: slug(title),
        title: title.to_string(),
        header_text: detect_header(document),
        footer_text: document.footer_text(),
        numbering_scheme: detect_numbering_scheme(&lines),
        marks_pattern: detect_marks_pattern(&lines).to_string(),
        colon_spacing: true,
        margin_cm: MarginRules::from(margins),
        indentation_cm: IndentationRules::default(),
    };
    debug!(id = %rules.id, scheme = ?rules.numbering_scheme, "template rules extracted");
    rules
}

fn detect_header(document: &Document) -> String {
    let header = document.header_text();
    if !header.is_empty() {
        return header;
    }

    // First short all-caps paragraph, usually the institution name
    document
        .paragraphs()
        .map(|paragraph| paragraph.text().trim().to_string())
        .find(|text| {
            !text.is_empty()
                && text.chars().count() < MAX_HEADER_CHARS
                && text.chars().any(char::is_alphabetic)
                && *text == text.to_uppercase()
        })
        .unwrap_or_else(|| DEFAULT_HEADER_TEXT.to_string())
}

/// Level formats in first-seen order; all three when none are found
fn detect_numbering_scheme(lines: &[String]) -> Vec<String> {
    let mut scheme: Vec<String> = Vec::new();
    for line in lines {
        // A single-letter marker like `(i)` counts as a letter level
        let format = if QUESTION_MARKER.is_match(line) {
            QUESTION_FORMAT
        } else if LETTER_MARKER.is_match(line) {
            LETTER_FORMAT
        } else if ROMAN_MARKER.is_match(line) {
            ROMAN_FORMAT
        } else {
            continue;
        };
        if !scheme.iter().any(|known| known == format) {
            scheme.push(format.to_string());
        }
    }

    if scheme.is_empty() {
        TemplateRules::default().numbering_scheme
    } else {
        scheme
    }
}

/// Notation of the first line carrying marks; parenthesised when none do
fn detect_marks_pattern(lines: &[String]) -> &'static str {
    for line in lines {
        if PAREN_MARKS.is_match(line) {
            return PAREN_MARKS_PATTERN;
        }
        if BRACKET_MARKS.is_match(line) {
            return BRACKET_MARKS_PATTERN;
        }
    }
    PAREN_MARKS_PATTERN
}

pub fn slug(title: &str) -> String {
    NON_SLUG
        .replace_all(&title.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Paragraph;

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn slug_collapses_punctuation() {
        assert_eq!(slug("Exam Paper Format Guideline 1"), "exam-paper-format-guideline-1");
        assert_eq!(slug("  Marking (Scheme) -- v2 "), "marking-scheme-v2");
    }

    #[test]
    fn numbering_scheme_keeps_first_seen_order() {
        let scheme = detect_numbering_scheme(&lines(&[
            "(a) first part",
            "Q1. Question",
            "(ii) subpart",
            "(b) second part",
        ]));
        assert_eq!(scheme, vec!["(a)", "Q{n}.", "(i)"]);
    }

    #[test]
    fn numbering_scheme_defaults_when_nothing_matches() {
        let scheme = detect_numbering_scheme(&lines(&["Instructions", "Answer all questions"]));
        assert_eq!(scheme, vec!["Q{n}.", "(a)", "(i)"]);
    }

    #[test]
    fn marks_pattern_follows_first_notation_seen() {
        assert_eq!(detect_marks_pattern(&lines(&["a [4 Marks]", "b (2 marks)"])), r"[\d+ marks?]");
        assert_eq!(detect_marks_pattern(&lines(&["b (1 mark)"])), r"(\d+ marks?)");
        assert_eq!(detect_marks_pattern(&lines(&["no marks here"])), r"(\d+ marks?)");
    }

    #[test]
    fn header_prefers_section_header_then_caps_paragraph() {
        let mut document = Document::from_texts(["Guideline", "NORTHERN TECHNICAL INSTITUTE", "Q1. x"]);
        assert_eq!(extract_template_rules(&document, "t").header_text, "NORTHERN TECHNICAL INSTITUTE");

        document.sections[0].header = vec![Paragraph::from_text("CITY COLLEGE")];
        assert_eq!(extract_template_rules(&document, "t").header_text, "CITY COLLEGE");

        let plain = Document::from_texts(["lower case only", "2024"]);
        assert_eq!(extract_template_rules(&plain, "t").header_text, DEFAULT_HEADER_TEXT);
    }

    #[test]
    fn margins_and_footer_come_from_first_section() {
        let mut document = Document::from_texts(["Q1. Explain (5 marks)"]);
        document.sections[0].margins = Margins {
            top: 2.0,
            bottom: 2.0,
            left: 3.5,
            right: 2.0,
        };
        document.sections[0].footer = vec![Paragraph::from_text("Confidential")];

        let rules = extract_template_rules(&document, "Exam Paper Format");

        assert_eq!(rules.id, "exam-paper-format");
        assert_eq!(rules.footer_text, "Confidential");
        assert_eq!(rules.margin_cm.resolve().left, 3.5);
        assert_eq!(rules.indentation_cm, IndentationRules::default());
        assert!(rules.colon_spacing);
    }
}
