use super::engine::{FormatRule, RuleScope};
use crate::types::{NumberingLevel, Paragraph, TemplateRules};
use regex::Regex;
use std::sync::LazyLock;

static QUESTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Q\d+\.").unwrap());
static PART: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\([a-z]\)").unwrap());
static SUBPART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:\([ivxlcdm]+\)|\(\d+\))").unwrap());

/// Classify a paragraph by its leading marker. Single letters win over
/// roman numerals, so `(i)` is a part and `(ii)` a subpart.
pub fn numbering_level(text: &str) -> Option<NumberingLevel> {
    let text = text.trim_start();
    if QUESTION.is_match(text) {
        Some(NumberingLevel::Question)
    } else if PART.is_match(text) {
        Some(NumberingLevel::Part)
    } else if SUBPART.is_match(text) {
        Some(NumberingLevel::Subpart)
    } else {
        None
    }
}

/// Sets the left indent of numbered paragraphs from `indentation_cm`
pub struct IndentationRule;

impl FormatRule for IndentationRule {
    fn name(&self) -> &'static str {
        "Indentation"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::Paragraph
    }

    fn apply_to_paragraph(&self, paragraph: &mut Paragraph, template: &TemplateRules) -> bool {
        let Some(level) = numbering_level(&paragraph.text()) else {
            return false;
        };
        let target = template.indentation_cm.for_level(level);
        if paragraph.left_indent_cm == Some(target) {
            return false;
        }
        paragraph.left_indent_cm = Some(target);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_leading_marker() {
        assert_eq!(numbering_level("Q3. Discuss"), Some(NumberingLevel::Question));
        assert_eq!(numbering_level("  (b) Explain"), Some(NumberingLevel::Part));
        assert_eq!(numbering_level("(iv) Prove"), Some(NumberingLevel::Subpart));
        assert_eq!(numbering_level("(IV) Prove"), Some(NumberingLevel::Subpart));
        assert_eq!(numbering_level("(12) Item"), Some(NumberingLevel::Subpart));
        assert_eq!(numbering_level("(i) Short"), Some(NumberingLevel::Part));
        assert_eq!(numbering_level("Q1) not yet fixed"), None);
        assert_eq!(numbering_level("Answer all questions"), None);
    }

    #[test]
    fn indent_comes_from_template() {
        let mut template = TemplateRules::default();
        template.indentation_cm.l2 = 2.0;
        let mut paragraph = Paragraph::from_text("(a) Part");

        assert!(IndentationRule.apply_to_paragraph(&mut paragraph, &template));
        assert_eq!(paragraph.left_indent_cm, Some(2.0));
        assert!(!IndentationRule.apply_to_paragraph(&mut paragraph, &template));
    }

    #[test]
    fn unclassified_paragraph_keeps_its_indent() {
        let mut paragraph = Paragraph {
            left_indent_cm: Some(0.75),
            ..Paragraph::from_text("Instructions to candidates")
        };
        assert!(!IndentationRule.apply_to_paragraph(&mut paragraph, &TemplateRules::default()));
        assert_eq!(paragraph.left_indent_cm, Some(0.75));
    }
}
