use super::engine::{FormatRule, RuleScope};
use crate::types::{Paragraph, TemplateRules};
use regex::Regex;
use std::sync::LazyLock;

static QUESTION_PAREN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Q(\d+)\)\s*").unwrap());
static SUBPART_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+([a-z])\)\s*").unwrap());

/// `Q1) ...` → `Q1.  ...` and `1a) ...` → `(a) ...`
pub struct NumberingRule;

impl NumberingRule {
    pub fn normalize(text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }
        let rewritten = if let Some(caps) = QUESTION_PAREN.captures(text) {
            format!("Q{}.  {}", &caps[1], &text[caps[0].len()..])
        } else if let Some(caps) = SUBPART_PAREN.captures(text) {
            format!("({}) {}", &caps[1], &text[caps[0].len()..])
        } else {
            return None;
        };
        (rewritten != text).then_some(rewritten)
    }
}

impl FormatRule for NumberingRule {
    fn name(&self) -> &'static str {
        "Numbering"
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
    fn question_marker_gets_period_and_two_spaces() {
        assert_eq!(NumberingRule::normalize("Q1) X").as_deref(), Some("Q1.  X"));
        assert_eq!(NumberingRule::normalize("Q12)Sort").as_deref(), Some("Q12.  Sort"));
    }

    #[test]
    fn subpart_marker_becomes_parenthesised_letter() {
        assert_eq!(NumberingRule::normalize("1a) X").as_deref(), Some("(a) X"));
        assert_eq!(NumberingRule::normalize("1c)   Y").as_deref(), Some("(c) Y"));
    }

    #[test]
    fn canonical_and_unrelated_text_pass_through() {
        assert_eq!(NumberingRule::normalize("Q1.  X"), None);
        assert_eq!(NumberingRule::normalize("(a) X"), None);
        assert_eq!(NumberingRule::normalize("  Q1) indented"), None);
        assert_eq!(NumberingRule::normalize("1.a.i nested"), None);
        assert_eq!(NumberingRule::normalize("   "), None);
    }
}
