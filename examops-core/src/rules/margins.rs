use super::engine::{FormatRule, RuleScope};
use crate::types::{Document, TemplateRules};

/// Sets every section's page margins from the template
pub struct MarginsRule;

impl FormatRule for MarginsRule {
    fn name(&self) -> &'static str {
        "Margins"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::Document
    }

    fn apply_to_document(&self, document: &mut Document, template: &TemplateRules) -> usize {
        let target = template.margin_cm.resolve();
        let mut changed = 0;
        for section in &mut document.sections {
            if section.margins != target {
                section.margins = target;
                changed += 1;
            }
        }
        changed
    }
}
