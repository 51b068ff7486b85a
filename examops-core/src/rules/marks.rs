use super::engine::{FormatRule, RuleScope};
use crate::types::{Paragraph, TemplateRules};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static MARKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(\d+)\s*marks?\]|\((\d+)\s*marks?\)").unwrap()
});

/// `[3 marks]`, `(3 Marks)` → `(3 marks)`; a single mark is always `(1 mark)`
pub struct MarksNotationRule;

impl MarksNotationRule {
    pub fn normalize(text: &str) -> Option<String> {
        let rewritten = MARKS.replace_all(text, |caps: &Captures| {
            let digits = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            // Digits too long for u64 are kept as written
            match digits.parse::<u64>() {
                Ok(1) => "(1 mark)".to_string(),
                Ok(n) => format!("({n} marks)"),
                Err(_) => format!("({digits} marks)"),
            }
        });
        (rewritten != text).then(|| rewritten.into_owned())
    }
}

impl FormatRule for MarksNotationRule {
    fn name(&self) -> &'static str {
        "MarksNotation"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::Paragraph
    }

    fn apply_to_paragraph(&self, paragraph: &mut Paragraph, _template: &TemplateRules) -> bool {
        match Self::normalize(&paragraph.text()) {
            Some(text) => {
                paragraph.set_text(text);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brackets_become_parentheses() {
        let out = MarksNotationRule::normalize("Define a stack [3 marks]").unwrap();
        assert_eq!(out, "Define a stack (3 marks)");
        assert!(!out.contains('['));
    }

    #[test]
    fn capitalised_unit_is_lowercased() {
        assert_eq!(
            MarksNotationRule::normalize("(2 Marks)").as_deref(),
            Some("(2 marks)")
        );
        assert_eq!(
            MarksNotationRule::normalize("[5 MARKS]").as_deref(),
            Some("(5 marks)")
        );
    }

    #[test]
    fn one_mark_is_singular() {
        assert_eq!(MarksNotationRule::normalize("[1 mark]").as_deref(), Some("(1 mark)"));
        assert_eq!(MarksNotationRule::normalize("(1 marks)").as_deref(), Some("(1 mark)"));
        assert_eq!(MarksNotationRule::normalize("(01 Mark)").as_deref(), Some("(1 mark)"));
    }

    #[test]
    fn canonical_notation_is_unchanged() {
        assert_eq!(MarksNotationRule::normalize("(3 marks) and (1 mark)"), None);
        assert_eq!(MarksNotationRule::normalize("no marks here"), None);
    }

    #[test]
    fn every_occurrence_is_rewritten() {
        assert_eq!(
            MarksNotationRule::normalize("[2 marks] then [4marks]").as_deref(),
            Some("(2 marks) then (4 marks)")
        );
    }
}
