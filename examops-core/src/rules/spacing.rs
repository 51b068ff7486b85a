use super::engine::{FormatRule, RuleScope};
use crate::types::{Paragraph, TemplateRules};
use regex::Regex;
use std::sync::LazyLock;

static SPACED_COLON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+:\s*").unwrap());

/// `DATE :Jan` → `DATE : Jan`. Colons with no whitespace before them are left alone.
pub struct ColonSpacingRule;

impl ColonSpacingRule {
    pub fn normalize(text: &str) -> Option<String> {
        let rewritten = SPACED_COLON.replace_all(text, " : ");
        (rewritten != text).then(|| rewritten.into_owned())
    }
}

impl FormatRule for ColonSpacingRule {
    fn name(&self) -> &'static str {
        "ColonSpacing"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::Paragraph
    }

    fn apply_to_paragraph(&self, paragraph: &mut Paragraph, template: &TemplateRules) -> bool {
        if !template.colon_spacing {
            return false;
        }
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
    fn colon_gets_single_space_on_both_sides() {
        assert_eq!(ColonSpacingRule::normalize("DATE :Jan").as_deref(), Some("DATE : Jan"));
        assert_eq!(
            ColonSpacingRule::normalize("CODE   :   CS101").as_deref(),
            Some("CODE : CS101")
        );
        assert_eq!(ColonSpacingRule::normalize("DATE : Jan"), None);
    }

    #[test]
    fn unspaced_colon_is_not_touched() {
        assert_eq!(ColonSpacingRule::normalize("Time: 2 hours"), None);
        assert_eq!(ColonSpacingRule::normalize("ratio 3:4"), None);
    }

    #[test]
    fn disabled_by_template() {
        let template = TemplateRules {
            colon_spacing: false,
            ..TemplateRules::default()
        };
        let mut paragraph = Paragraph::from_text("DATE :Jan");
        assert!(!ColonSpacingRule.apply_to_paragraph(&mut paragraph, &template));
        assert_eq!(paragraph.text(), "DATE :Jan");
    }
}
